pub mod balance;
pub mod branch;
pub mod company;
pub mod driver;
pub mod driver_invite;
pub mod mission;
pub mod mobile_user;
pub mod refresh_token;
pub mod role;
pub mod route;
pub mod vehicle;
pub mod web_user;

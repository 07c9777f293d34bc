pub mod auth;
pub mod balance;
pub mod branches;
pub mod drivers;
pub mod invites;
pub mod missions;
pub mod mobile;
pub mod vehicles;

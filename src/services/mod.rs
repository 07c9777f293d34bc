pub mod balance;
pub mod companies;
pub mod invites;
pub mod login;
pub mod optimizer;
pub mod refresh_tokens;
pub mod seed;

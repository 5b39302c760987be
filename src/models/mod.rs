pub mod client;
pub mod principal;
pub mod token;

pub use client::{Client, NewClient};
pub use principal::{Principal, PrincipalRef};
pub use token::{NewToken, Token};

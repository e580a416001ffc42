pub mod fsutils;
pub mod numbered;
pub mod time;

pub mod calls;
pub mod health;
pub mod history;
pub mod rooms;

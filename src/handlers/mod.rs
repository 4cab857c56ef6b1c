pub mod health;
mod helpers;
pub mod image;

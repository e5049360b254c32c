pub mod countdown;
pub mod disintegrate;
pub mod models;
pub mod notification;
pub mod validation;

pub mod app_state;
pub mod chat;
pub mod console;
pub mod render;

pub use app_state::AppController;

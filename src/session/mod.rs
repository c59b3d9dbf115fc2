pub mod clock;
pub mod manager;

pub use clock::{ Clock, ManualClock, SystemClock };
pub use manager::{ ConversationManager, ConversationState, Resolution, FRESHNESS_WINDOW_HOURS };

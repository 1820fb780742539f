pub mod now_playing;
pub mod random_emoji;
pub mod random_sticker;
pub mod role_members;

pub use now_playing::now_playing;
pub use random_emoji::random_emoji;
pub use random_sticker::random_sticker;
pub use role_members::role_members;

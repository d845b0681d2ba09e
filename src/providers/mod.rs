mod tiktok;
mod traits;

pub use tiktok::TikTokClient;
pub use traits::{OAuthRefreshClient, TikTokApi, TikTokVideo, TokenSet, VideoListPage};

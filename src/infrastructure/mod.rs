pub mod circonus;
pub mod core;
pub mod mock;

pub use self::circonus::CirconusApiClient;
pub use self::core::HttpClientFactory;
pub use self::mock::MockCheckApi;

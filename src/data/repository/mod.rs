mod follows;
mod messages;
mod posts;
mod signups;
mod stats;
mod users;

pub use follows::FollowRepository;
pub use messages::{Delivery, MessageRepository};
pub use posts::PostRepository;
pub use signups::SignupRepository;
pub use stats::StatsRepository;
pub use users::UserRepository;

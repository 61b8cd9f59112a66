/// Persistence managers over the shared SQLite pool
pub mod accounts;
pub mod media;
pub mod posts;

pub use accounts::AccountStore;
pub use media::MediaStore;
pub use posts::{CreateOutcome, NewPost, PostPatch, PostStore};

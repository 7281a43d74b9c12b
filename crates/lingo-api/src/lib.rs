pub mod auth;
pub mod chats;
pub mod credentials;
pub mod error;
pub mod fanout;
pub mod guests;
pub mod invites;
pub mod messages;
pub mod middleware;
pub mod ratelimit;
pub mod reaper;
pub mod resolver;
pub mod state;
pub mod tokens;
pub mod translation;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

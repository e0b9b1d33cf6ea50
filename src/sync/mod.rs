pub mod bus;
pub mod clock;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod intent;
pub mod reconcile;
pub mod session;

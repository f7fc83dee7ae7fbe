//! Message dispatcher (§4.9 / C9): the seam between the wire protocol and
//! every other subsystem. One [`Dispatcher`] instance is shared across all
//! connected peers; each peer's reader task calls [`Dispatcher::dispatch`]
//! for every inbound [`motivo_proto::Command`] it decodes.

mod dispatcher;

pub use dispatcher::Dispatcher;

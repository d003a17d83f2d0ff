//! Crate-level tests driving a [`Socket`](crate::Socket) against an
//! in-memory remote.

pub(crate) mod support;

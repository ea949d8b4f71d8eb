//! End-to-end scenarios over the public API: schema definition, graph
//! construction behind named roots, snapshot isolation, and commit-time
//! merging of concurrent transactions.

mod common;

mod concurrent;
mod constraints;
mod create_read;
mod introduced;
mod properties;

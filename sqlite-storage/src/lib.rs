/*!
Persistent bundle store over SQLite.

Two tables: `bundles(id, data)` holds the encoded bytes, and
`bundle_metadata` the [`BundlePack`](mule_bpa::store::BundlePack)
descriptor, with cascade delete from `bundles`. A push and its metadata
write share one transaction.
*/

mod migrate;
mod storage;

pub use storage::Storage;

pub const DB_FILE: &str = "bundles.db";

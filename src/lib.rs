#[macro_use]
extern crate num_derive;

mod error;

pub mod db;
pub mod iterator;
pub mod memtable;
pub mod sstable;
pub mod storage;
pub mod util;
pub mod wal;

pub use error::{Error, IResult};
pub use memtable::skiplist;

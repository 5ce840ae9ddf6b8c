pub mod coding;
pub mod comparator;
pub mod crc32;

use crate::IResult;

/// An `Iter` yields a sequence of key/value pairs from an underlying
/// sorted source (skiplist, block, table). A freshly created iterator
/// is not positioned; callers must seek before using `key`/`value`.
pub trait Iter {
    /// Returns true iff the iterator is positioned at a valid entry.
    fn valid(&self) -> bool;

    /// Positions at the first entry in the source.
    fn seek_to_first(&mut self);

    /// Positions at the last entry in the source.
    fn seek_to_last(&mut self);

    /// Positions at the first entry with a key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Positions at the last entry with a key <= `target`.
    fn seek_for_prev(&mut self, target: &[u8]);

    /// Moves to the next entry. REQUIRES: `valid()`.
    fn next(&mut self);

    /// Moves to the previous entry. REQUIRES: `valid()`.
    fn prev(&mut self);

    /// The key at the current position. REQUIRES: `valid()`.
    fn key(&self) -> &[u8];

    /// The value at the current position. REQUIRES: `valid()`.
    fn value(&self) -> &[u8];

    /// Surfaces the first error the iterator has hit, if any.
    fn status(&mut self) -> IResult<()>;
}

//! Per-type embedder metadata: one untyped slot per registered `T`, set by
//! whichever caller gets there first or last (last-writer-wins, no attempt
//! at coordination) and read back through a checked cast.

use crate::typeinfo;

/// Installs `metadata` as type `T`'s embedder metadata, replacing whatever
/// was there before. The pointer is never freed or inspected by this crate;
/// the embedder owns its lifetime.
pub fn set_metadata<T: 'static, M>(metadata: *mut M) -> crate::error::Result<()> {
    let info = typeinfo::type_info::<T>()?;
    info.set_metadata(metadata as *mut ());
    Ok(())
}

/// Reads back `T`'s current embedder metadata pointer, or null if none has
/// been set.
pub fn get_metadata<T: 'static, M>() -> crate::error::Result<*mut M> {
    let info = typeinfo::type_info::<T>()?;
    Ok(info.metadata() as *mut M)
}

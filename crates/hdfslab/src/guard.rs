//! Scoped ownership of native ids.
//!
//! A [`NativeGuard`] closes its id exactly once when dropped. Guards declared
//! later in a scope drop first, so nested acquisitions are released
//! last-acquired, first-released on every exit path.

use hdfslab_native::{Hid, Library, NativeError};

/// Kind of native id held by a guard; selects the matching close call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdKind {
    Dataspace,
    Datatype,
    Dataset,
    Group,
    Attribute,
    Object,
}

pub(crate) struct NativeGuard<'lib> {
    lib: &'lib Library,
    id: Hid,
    kind: IdKind,
}

impl<'lib> NativeGuard<'lib> {
    /// Take ownership of `id`, or pass through the error that prevented
    /// obtaining it.
    pub(crate) fn new(
        lib: &'lib Library,
        kind: IdKind,
        id: Result<Hid, NativeError>,
    ) -> Result<Self, NativeError> {
        Ok(NativeGuard { lib, id: id?, kind })
    }

    pub(crate) fn dataspace(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Dataspace, id)
    }

    pub(crate) fn datatype(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Datatype, id)
    }

    pub(crate) fn dataset(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Dataset, id)
    }

    pub(crate) fn group(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Group, id)
    }

    pub(crate) fn attribute(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Attribute, id)
    }

    pub(crate) fn object(lib: &'lib Library, id: Result<Hid, NativeError>) -> Result<Self, NativeError> {
        Self::new(lib, IdKind::Object, id)
    }

    pub(crate) fn id(&self) -> Hid {
        self.id
    }
}

impl Drop for NativeGuard<'_> {
    fn drop(&mut self) {
        let result = match self.kind {
            IdKind::Dataspace => self.lib.space_close(self.id),
            IdKind::Datatype => self.lib.type_close(self.id),
            IdKind::Dataset => self.lib.dataset_close(self.id),
            IdKind::Group => self.lib.group_close(self.id),
            IdKind::Attribute => self.lib.attr_close(self.id),
            IdKind::Object => self.lib.object_close(self.id),
        };
        if let Err(e) = result {
            tracing::warn!(id = self.id, kind = ?self.kind, error = %e, "failed to close native id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_closes() {
        let lib = Library::new();
        {
            let space = NativeGuard::dataspace(&lib, lib.space_create_scalar()).unwrap();
            assert!(space.id() > 0);
            assert_eq!(lib.open_id_count(), 1);
        }
        assert_eq!(lib.open_id_count(), 0);
    }

    #[test]
    fn failed_acquire_holds_nothing() {
        let lib = Library::new();
        let guard = NativeGuard::datatype(&lib, lib.type_get_super(12345));
        assert!(guard.is_err());
        assert_eq!(lib.open_id_count(), 0);
    }

    #[test]
    fn early_return_releases_everything() {
        fn work(lib: &Library) -> Result<(), NativeError> {
            let _a = NativeGuard::dataspace(lib, lib.space_create_scalar())?;
            let _b = NativeGuard::datatype(lib, lib.type_register(hdfslab_native::Datatype::native_float(8)))?;
            lib.dataset_open(999, "/nope")?;
            Ok(())
        }
        let lib = Library::new();
        assert!(work(&lib).is_err());
        assert_eq!(lib.open_id_count(), 0);
    }

    #[test]
    fn close_failure_is_swallowed() {
        let lib = Library::new();
        let space = lib.space_create_scalar().unwrap();
        let guard = NativeGuard::dataspace(&lib, Ok(space)).unwrap();
        lib.space_close(space).unwrap();
        drop(guard);
        assert_eq!(lib.open_id_count(), 0);
    }
}

//! Native object handles
//!
//! An `ObjectHandle` pairs a native object identity with the runtime that owns
//! it. A handle is either *owning* (it holds one native reference, released on
//! drop) or *borrowed* (it was handed to us, e.g. as a callback parameter, and
//! never releases anything).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::native::{NativeError, NativeRuntime, ObjectId};
use crate::types::Type;
use crate::value::{GenericValue, HostValue};

/// Reference to a native object.
pub struct ObjectHandle {
    id: ObjectId,
    native: Arc<dyn NativeRuntime>,
    owned: bool,
}

impl ObjectHandle {
    /// Adopt a reference the caller already holds.
    pub fn from_owned(native: Arc<dyn NativeRuntime>, id: ObjectId) -> Self {
        Self {
            id,
            native,
            owned: true,
        }
    }

    /// Wrap an identity without taking a reference.
    pub fn from_borrowed(native: Arc<dyn NativeRuntime>, id: ObjectId) -> Self {
        Self {
            id,
            native,
            owned: false,
        }
    }

    /// A borrowed handle to the same object.
    pub fn borrowed(&self) -> Self {
        Self::from_borrowed(self.native.clone(), self.id)
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Check if dropping this handle releases a native reference.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    #[inline]
    pub fn native(&self) -> &Arc<dyn NativeRuntime> {
        &self.native
    }

    /// Runtime type of the object.
    pub fn type_(&self) -> Result<Type, NativeError> {
        self.native.object_type(self.id)
    }

    pub fn type_name(&self) -> Result<String, NativeError> {
        let ty = self.type_()?;
        Ok(self
            .native
            .type_name(ty)
            .unwrap_or_else(|| ty.to_string()))
    }

    // =========================================================================
    // Reference counting
    // =========================================================================

    /// Take a new native reference and return an owning handle for it.
    pub fn ref_object(&self) -> Result<ObjectHandle, NativeError> {
        self.native.object_ref(self.id)?;
        Ok(Self::from_owned(self.native.clone(), self.id))
    }

    /// Release the reference this handle owns. A no-op for borrowed handles.
    ///
    /// Consumes the handle: nothing can dereference it afterwards.
    pub fn unref(mut self) -> Result<(), NativeError> {
        if !self.owned {
            return Ok(());
        }
        self.owned = false;
        self.native.object_unref(self.id)
    }

    /// Sink a floating reference (or take a new one) into an owning handle.
    pub fn ref_sink(&self) -> Result<ObjectHandle, NativeError> {
        self.native.object_ref_sink(self.id)?;
        Ok(Self::from_owned(self.native.clone(), self.id))
    }

    // =========================================================================
    // Values and properties
    // =========================================================================

    /// This object as a tagged value.
    pub fn value(&self) -> Result<GenericValue, NativeError> {
        GenericValue::from_host(&HostValue::Object(self.clone()))
    }

    pub fn set_property(&self, name: &str, value: impl Into<HostValue>) -> Result<(), NativeError> {
        let value = GenericValue::from_host(&value.into())?;
        self.native.set_property(self.id, name, &value)
    }

    pub fn get_property(&self, name: &str) -> Result<HostValue, NativeError> {
        Ok(self.native.get_property(self.id, name)?.to_host_natural())
    }
}

impl Clone for ObjectHandle {
    /// Owning handles take another reference; borrowed handles stay borrowed.
    fn clone(&self) -> Self {
        if self.owned {
            if let Err(e) = self.native.object_ref(self.id) {
                // The handle's own reference keeps the object alive, so this
                // only happens if someone released it behind our back.
                panic!("owning handle {:?} lost its object: {}", self.id, e);
            }
        }
        Self {
            id: self.id,
            native: self.native.clone(),
            owned: self.owned,
        }
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = self.native.object_unref(self.id) {
                log::warn!("dropping handle for {:?}: {}", self.id, e);
            }
        }
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("owned", &self.owned)
            .finish()
    }
}

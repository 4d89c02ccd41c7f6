//! Type Registry
//!
//! Stores the native type hierarchy: the fixed fundamentals plus object types
//! registered at runtime, with their declared properties.

use std::collections::HashMap;

use super::Type;

/// A declared object property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: String,
    pub ty: Type,
}

/// One registered type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub name: String,
    /// Parent type. `None` for fundamentals.
    pub parent: Option<Type>,
    /// Instances start with a floating reference.
    pub initially_unowned: bool,
    /// Properties declared on this type (not inherited ones).
    pub properties: Vec<PropertySpec>,
}

/// The type registry stores all native type definitions.
#[derive(Debug)]
pub struct TypeRegistry {
    /// Indexed by `Type.0`.
    types: Vec<TypeInfo>,
    /// Name to type lookup.
    name_to_id: HashMap<String, Type>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry holding only the fundamental types.
    pub fn new() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            name_to_id: HashMap::new(),
        };
        for (ty, name) in Type::FUNDAMENTALS {
            debug_assert_eq!(ty.0 as usize, registry.types.len());
            registry.types.push(TypeInfo {
                name: name.to_string(),
                parent: None,
                initially_unowned: false,
                properties: Vec::new(),
            });
            registry.name_to_id.insert(name.to_string(), ty);
        }
        registry
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a new object type deriving from `parent`.
    ///
    /// Panics if the name is taken or `parent` isn't an object type.
    pub fn register_object_type(
        &mut self,
        name: &str,
        parent: Type,
        initially_unowned: bool,
    ) -> Type {
        assert!(
            !self.name_to_id.contains_key(name),
            "type '{}' is already registered",
            name
        );
        assert!(
            self.is_object(parent),
            "parent of '{}' must be an object type, got {}",
            name,
            parent
        );
        let ty = Type(self.types.len() as u32);
        let inherited = self.types[parent.0 as usize].initially_unowned;
        self.types.push(TypeInfo {
            name: name.to_string(),
            parent: Some(parent),
            initially_unowned: initially_unowned || inherited,
            properties: Vec::new(),
        });
        self.name_to_id.insert(name.to_string(), ty);
        ty
    }

    /// Declare a property on an object type.
    pub fn install_property(&mut self, owner: Type, name: &str, ty: Type) {
        assert!(self.is_object(owner), "{} isn't an object type", owner);
        assert!(
            self.find_property(owner, name).is_none(),
            "property '{}' already exists on {}",
            name,
            self.types[owner.0 as usize].name
        );
        self.types[owner.0 as usize].properties.push(PropertySpec {
            name: name.to_string(),
            ty,
        });
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Look up a type by name.
    pub fn lookup_by_name(&self, name: &str) -> Option<Type> {
        self.name_to_id.get(name).copied()
    }

    /// Get the name of a type.
    pub fn get_name(&self, ty: Type) -> Option<&str> {
        self.types.get(ty.0 as usize).map(|info| info.name.as_str())
    }

    /// Get a type's definition.
    pub fn get(&self, ty: Type) -> Option<&TypeInfo> {
        self.types.get(ty.0 as usize)
    }

    /// Get the parent of a type.
    pub fn parent(&self, ty: Type) -> Option<Type> {
        self.types.get(ty.0 as usize).and_then(|info| info.parent)
    }

    /// Check whether `ty` is `ancestor` or derives from it. Reflexive and transitive.
    pub fn is_a(&self, ty: Type, ancestor: Type) -> bool {
        let mut current = Some(ty);
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            current = self.parent(t);
        }
        false
    }

    /// Check if a type is `Object` or one of its registered descendants.
    pub fn is_object(&self, ty: Type) -> bool {
        (ty.0 as usize) < self.types.len() && self.is_a(ty, Type::OBJECT)
    }

    /// Check if instances of `ty` start floating.
    pub fn is_initially_unowned(&self, ty: Type) -> bool {
        self.get(ty).is_some_and(|info| info.initially_unowned)
    }

    /// Iterate `ty` and its ancestors, most derived first.
    pub fn ancestors(&self, ty: Type) -> impl Iterator<Item = Type> + '_ {
        std::iter::successors(Some(ty), move |t| self.parent(*t))
    }

    /// Find a property declared on `ty` or an ancestor.
    pub fn find_property(&self, ty: Type, name: &str) -> Option<&PropertySpec> {
        self.ancestors(ty).find_map(|t| {
            self.types
                .get(t.0 as usize)?
                .properties
                .iter()
                .find(|p| p.name == name)
        })
    }
}

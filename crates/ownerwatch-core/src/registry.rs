//! Ordered collection of controller descriptors

use tracing::debug;

use crate::descriptor::ControllerDescriptor;
use crate::error::RegistryError;

/// Descriptors in registration order
///
/// Built during process initialization and only read afterwards; [`bind`]
/// takes it by shared reference.
///
/// [`bind`]: crate::bind
#[derive(Clone, Debug, Default)]
pub struct Registry {
    descriptors: Vec<ControllerDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, stopping at the first invalid descriptor
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ControllerDescriptor>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Validate and append a descriptor
    pub fn register(&mut self, descriptor: ControllerDescriptor) -> Result<(), RegistryError> {
        descriptor.validate()?;

        debug!(
            primary = %descriptor.primary_kind(),
            handler = %descriptor.handler(),
            secondaries = descriptor.secondary_kinds().len(),
            "Registered controller"
        );

        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn list(&self) -> &[ControllerDescriptor] {
        &self.descriptors
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ControllerDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a ControllerDescriptor;
    type IntoIter = std::slice::Iter<'a, ControllerDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

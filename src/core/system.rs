use crate::core::component::Component;
use crate::core::resource::Resource;
use crate::errors::{DespatchError, SystemError};
use crate::model::Formulation;
use crate::results::DispatchResults;
use crate::solver::SolveOptions;
use indexmap::IndexMap;
use itertools::Itertools;
use std::fmt::Write;
use tracing::info;

/// The system graph handed to a dispatch formulation: name-keyed registries
/// of resources and components plus the ordered time index every profile is
/// broadcast against.
///
/// Components and resources are validated at construction and registered
/// here by value; registration rejects duplicate names and references to
/// unregistered resources. [`System::normalize`] broadcasts every
/// scalar-or-series field to the horizon length; it recomputes from the raw
/// specification each time, so it is safe to call again after further
/// components are added.
#[derive(Clone, Debug)]
pub struct System {
    name: String,
    time_index: Vec<f64>,
    resources: IndexMap<String, Resource>,
    components: IndexMap<String, Component>,
}

impl System {
    pub fn new(name: impl Into<String>, time_index: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            time_index,
            resources: IndexMap::new(),
            components: IndexMap::new(),
        }
    }

    /// A system over `steps` uniformly numbered time steps.
    pub fn with_steps(name: impl Into<String>, steps: usize) -> Self {
        Self::new(name, (0..steps).map(|t| t as f64).collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_index(&self) -> &[f64] {
        &self.time_index
    }

    /// Number of time steps every normalized profile must match.
    pub fn horizon(&self) -> usize {
        self.time_index.len()
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<&mut Self, SystemError> {
        if self.resources.contains_key(resource.name()) {
            return Err(SystemError::DuplicateResource(resource.name().to_string()));
        }
        self.resources.insert(resource.name().to_string(), resource);
        Ok(self)
    }

    pub fn add_component(&mut self, component: Component) -> Result<&mut Self, SystemError> {
        if self.components.contains_key(component.name()) {
            return Err(SystemError::DuplicateComponent(component.name().to_string()));
        }
        for resource in component
            .consumes()
            .iter()
            .chain(component.produces())
            .chain([component.capacity_resource()])
        {
            if !self.resources.contains_key(resource.name()) {
                return Err(SystemError::UnknownResource {
                    component: component.name().to_string(),
                    resource: resource.name().to_string(),
                });
            }
        }
        self.components
            .insert(component.name().to_string(), component);
        Ok(self)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Names of components that are not storage, in registration order.
    pub fn non_storage_names(&self) -> Vec<&str> {
        self.components
            .values()
            .filter(|c| !c.is_storage())
            .map(Component::name)
            .collect()
    }

    /// Names of storage components, in registration order.
    pub fn storage_names(&self) -> Vec<&str> {
        self.components
            .values()
            .filter(|c| c.is_storage())
            .map(Component::name)
            .collect()
    }

    /// Whether every component currently carries resolved limits for this
    /// system's horizon.
    pub fn is_normalized(&self) -> bool {
        let horizon = self.horizon();
        self.components
            .values()
            .all(|c| c.limits().is_some_and(|l| l.max.len() == horizon))
    }

    /// Broadcast every time-varying field on every component and cashflow to
    /// the horizon length. Shape mismatches are reported with the offending
    /// component and field.
    pub fn normalize(&mut self) -> Result<(), SystemError> {
        let horizon = self.horizon();
        for component in self.components.values_mut() {
            component.normalize(horizon)?;
        }
        Ok(())
    }

    /// Normalize, compile the requested formulation, solve it and read the
    /// dispatch back as a table.
    pub fn solve(
        &mut self,
        formulation: Formulation,
        options: &SolveOptions,
    ) -> Result<DispatchResults, DespatchError> {
        self.normalize()?;
        info!(system = %self.name, %formulation, "compiling dispatch model");
        match formulation {
            Formulation::PriceTaker => {
                let mut builder = crate::model::price_taker::PriceTakerBuilder::new(self);
                builder.build()?;
                builder.solve(options)?;
                Ok(builder.extract_results()?)
            }
        }
    }

    /// A human-readable inventory of the system, one line per component.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "System '{}': {} time steps, {} resources, {} components\n",
            self.name,
            self.horizon(),
            self.resources.len(),
            self.components.len(),
        );
        let _ = writeln!(
            out,
            "  resources: {}",
            self.resources.keys().join(", ")
        );
        for component in self.components.values() {
            let io = if component.is_storage() {
                format!("stores {}", component.capacity_resource().name())
            } else {
                format!(
                    "consumes [{}], produces [{}]",
                    component.consumes().iter().map(Resource::name).join(", "),
                    component.produces().iter().map(Resource::name).join(", "),
                )
            };
            let _ = writeln!(
                out,
                "  {} ({}): {}",
                component.name(),
                component_kind_label(component),
                io
            );
        }
        out
    }
}

fn component_kind_label(component: &Component) -> &'static str {
    use crate::core::component::ComponentKind;
    match component.kind() {
        ComponentKind::Source => "Source",
        ComponentKind::Sink => "Sink",
        ComponentKind::Converter { .. } => "Converter",
        ComponentKind::Storage(_) => "Storage",
    }
}

//! Property descriptors exposed to the host.
//!
//! The host owns the property table and its before-get/after-set callback
//! plumbing. Adapters describe what they expose with [`PropertyDescriptor`]:
//! name, type, default, mutability, whether it may only change before
//! `initialize()`, and optional numeric limits or allowed values. The host
//! calls [`PropertyDescriptor::validate`] before forwarding a write.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    String,
    Float,
    Integer,
}

/// A property value as exchanged with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Float(f64),
    Integer(i64),
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Integer(_) => PropertyKind::Integer,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(v) => Some(*v),
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::String(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Integer(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

/// Description of one host-visible property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub kind: PropertyKind,
    pub default: PropertyValue,
    pub read_only: bool,
    /// May only be written before the device is initialized.
    pub pre_init: bool,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// When non-empty, the value (rendered as text) must be one of these.
    pub allowed_values: Vec<String>,
}

impl PropertyDescriptor {
    pub fn new(name: impl Into<String>, default: impl Into<PropertyValue>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            kind: default.kind(),
            default,
            read_only: false,
            pre_init: false,
            min_value: None,
            max_value: None,
            allowed_values: Vec::new(),
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn pre_init(mut self) -> Self {
        self.pre_init = true;
        self
    }

    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Check a write against type, mutability, limits and allowed values.
    ///
    /// `initialized` tells whether the owning device has been initialized,
    /// which closes pre-init properties.
    pub fn validate(&self, value: &PropertyValue, initialized: bool) -> AppResult<()> {
        if self.read_only {
            return Err(DaqError::ParameterReadOnly);
        }
        if self.pre_init && initialized {
            return Err(DaqError::PreInitOnly(self.name.clone()));
        }

        let kind_ok = value.kind() == self.kind
            || (self.kind == PropertyKind::Float && value.kind() == PropertyKind::Integer);
        if !kind_ok {
            return Err(DaqError::InvalidParameter(format!(
                "property '{}' expects {:?}, got {:?}",
                self.name,
                self.kind,
                value.kind()
            )));
        }

        if !self.allowed_values.is_empty() && !self.allowed_values.contains(&value.to_string()) {
            return Err(DaqError::ParameterInvalidChoice);
        }

        if let Some(v) = value.as_f64() {
            let below = self.min_value.is_some_and(|min| v < min);
            let above = self.max_value.is_some_and(|max| v > max);
            if below || above || !v.is_finite() {
                return Err(DaqError::InvalidParameter(format!(
                    "property '{}' value {} outside [{}, {}]",
                    self.name,
                    v,
                    self.min_value.unwrap_or(f64::NEG_INFINITY),
                    self.max_value.unwrap_or(f64::INFINITY)
                )));
            }
        }

        Ok(())
    }
}

/// Ordered collection of descriptors, looked up by name.
#[derive(Debug, Clone, Default)]
pub struct PropertySet {
    properties: Vec<PropertyDescriptor>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor.
    pub fn register(&mut self, descriptor: PropertyDescriptor) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.name == descriptor.name)
        {
            Some(existing) => *existing = descriptor,
            None => self.properties.push(descriptor),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

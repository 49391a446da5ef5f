use crate::{Codec, Marshaller, RegistryError};
use derive_more::Display;
use std::{collections::HashMap, str::FromStr, sync::Arc};

/// Parsed `"<holder>#<field>"` codec reference.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{holder}#{field}")]
pub struct CodecRef {
    holder: Arc<str>,
    field: Arc<str>,
}

impl CodecRef {
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl FromStr for CodecRef {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistryError::InvalidCodecRef {
            reference: s.to_string(),
        };
        let (holder, field) = s.split_once('#').ok_or_else(invalid)?;
        if holder.is_empty() || field.is_empty() || field.contains('#') {
            return Err(invalid());
        }
        Ok(Self {
            holder: Arc::from(holder),
            field: Arc::from(field),
        })
    }
}

#[derive(Debug, Default)]
pub struct CodecRegistryBuilder {
    map: HashMap<CodecRef, Marshaller>,
    errors: Vec<RegistryError>,
}

impl CodecRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors are collected and reported by `build`.
    pub fn add(mut self, reference: &str, codec: impl Codec) -> Self {
        match reference.parse::<CodecRef>() {
            Ok(key) if self.map.contains_key(&key) => {
                self.errors.push(RegistryError::DuplicateCodec {
                    reference: key.to_string(),
                });
            }
            Ok(key) => {
                self.map.insert(key, Marshaller::new(codec));
            }
            Err(e) => self.errors.push(e),
        }
        self
    }

    pub fn build(mut self) -> Result<CodecRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(self.errors.swap_remove(0));
        }
        tracing::debug!(codecs = self.map.len(), "codec registry built");
        Ok(CodecRegistry {
            inner: Arc::new(self.map),
        })
    }
}

/// Immutable lookup from codec references to marshallers.
#[derive(Debug, Default, Clone)]
pub struct CodecRegistry {
    inner: Arc<HashMap<CodecRef, Marshaller>>,
}

impl CodecRegistry {
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::new()
    }

    pub fn resolve(&self, reference: &str) -> Result<(CodecRef, Marshaller), RegistryError> {
        let key = reference.parse::<CodecRef>()?;
        let marshaller = self
            .inner
            .get(&key)
            .cloned()
            .ok_or_else(|| RegistryError::UnresolvedCodec {
                reference: key.to_string(),
            })?;
        Ok((key, marshaller))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

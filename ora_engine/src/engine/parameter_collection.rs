use super::parameter::OraParameter;
use crate::error::{OraError, Result};
use crate::protocol::Value;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

const ALREADY_OWNED: &str = "The parameter is already contained by this or another collection.";
const NOT_CONTAINED: &str = "The parameter is not contained by this collection.";

/// Ordered parameters of one command. A parameter belongs to at most one
/// collection at a time; removing it (or dropping the collection) frees it.
pub struct ParameterCollection {
    id: u64,
    items: Vec<OraParameter>,
}

impl Default for ParameterCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterCollection {
    pub fn new() -> Self {
        Self {
            id: NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed),
            items: Vec::new(),
        }
    }

    fn assert_index(&self, index: usize) -> Result<()> {
        if index >= self.items.len() {
            return Err(OraError::IndexOutOfRange(format!(
                "Invalid index {} for a collection with {} parameter(s)",
                index,
                self.items.len()
            )));
        }
        Ok(())
    }

    fn claim(&self, parameter: &OraParameter) -> Result<()> {
        if parameter.try_claim(self.id) {
            Ok(())
        } else {
            Err(OraError::ParameterOwnership(ALREADY_OWNED.to_string()))
        }
    }

    /// Appends `parameter` and returns its index.
    pub fn add(&mut self, parameter: OraParameter) -> Result<usize> {
        self.claim(&parameter)?;
        self.items.push(parameter);
        Ok(self.items.len() - 1)
    }

    pub fn add_with_value(
        &mut self,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<OraParameter> {
        let parameter = OraParameter::with_value(name, value);
        self.add(parameter.clone())?;
        Ok(parameter)
    }

    /// Adds every parameter or none of them.
    pub fn add_range(&mut self, parameters: &[OraParameter]) -> Result<()> {
        for (i, parameter) in parameters.iter().enumerate() {
            let repeated = parameters[..i].iter().any(|p| p.ptr_eq(parameter));
            if repeated || parameter.is_owned() {
                return Err(OraError::ParameterOwnership(ALREADY_OWNED.to_string()));
            }
        }
        for parameter in parameters {
            self.add(parameter.clone())?;
        }
        Ok(())
    }

    pub fn insert(&mut self, index: usize, parameter: OraParameter) -> Result<()> {
        if index > self.items.len() {
            return Err(OraError::IndexOutOfRange(format!(
                "Invalid insert position {} for a collection with {} parameter(s)",
                index,
                self.items.len()
            )));
        }
        self.claim(&parameter)?;
        self.items.insert(index, parameter);
        Ok(())
    }

    pub fn remove(&mut self, parameter: &OraParameter) -> Result<()> {
        let index = self
            .index_of_parameter(parameter)
            .ok_or_else(|| OraError::ParameterOwnership(NOT_CONTAINED.to_string()))?;
        self.remove_at(index).map(|_| ())
    }

    pub fn remove_at(&mut self, index: usize) -> Result<OraParameter> {
        self.assert_index(index)?;
        let parameter = self.items.remove(index);
        parameter.set_owner(None);
        Ok(parameter)
    }

    pub fn remove_named(&mut self, name: &str) -> Result<OraParameter> {
        let index = self.named_index(name)?;
        self.remove_at(index)
    }

    pub fn clear(&mut self) {
        for parameter in self.items.drain(..) {
            parameter.set_owner(None);
        }
    }

    /// Position of the parameter called `name`: an exact match wins over an
    /// earlier case-insensitive one.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|p| p.name() == name)
            .or_else(|| {
                self.items
                    .iter()
                    .position(|p| p.name().eq_ignore_ascii_case(name))
            })
    }

    pub fn index_of_parameter(&self, parameter: &OraParameter) -> Option<usize> {
        self.items.iter().position(|p| p.ptr_eq(parameter))
    }

    pub fn contains(&self, parameter: &OraParameter) -> bool {
        self.index_of_parameter(parameter).is_some()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    fn named_index(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| {
            OraError::IndexOutOfRange(format!("Parameter '{}' is not in the collection", name))
        })
    }

    pub fn get(&self, index: usize) -> Result<&OraParameter> {
        self.assert_index(index)?;
        Ok(&self.items[index])
    }

    pub fn get_named(&self, name: &str) -> Result<&OraParameter> {
        let index = self.named_index(name)?;
        Ok(&self.items[index])
    }

    /// Replaces the parameter at `index`. The replaced parameter is freed.
    /// Setting a parameter into its own slot is a no-op.
    pub fn set(&mut self, index: usize, parameter: OraParameter) -> Result<()> {
        self.assert_index(index)?;
        if self.items[index].ptr_eq(&parameter) {
            return Ok(());
        }
        self.claim(&parameter)?;
        let previous = std::mem::replace(&mut self.items[index], parameter);
        previous.set_owner(None);
        Ok(())
    }

    pub fn set_named(&mut self, name: &str, parameter: OraParameter) -> Result<()> {
        let index = self.named_index(name)?;
        self.set(index, parameter)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OraParameter> {
        self.items.iter()
    }
}

impl<'a> IntoIterator for &'a ParameterCollection {
    type Item = &'a OraParameter;
    type IntoIter = std::slice::Iter<'a, OraParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl Drop for ParameterCollection {
    fn drop(&mut self) {
        self.clear();
    }
}

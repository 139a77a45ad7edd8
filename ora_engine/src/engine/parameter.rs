use crate::protocol::{NativeType, ParameterDirection, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct ParameterInner {
    name: String,
    value: Value,
    direction: ParameterDirection,
    native_type: NativeType,
    size: usize,
    /// Id of the collection currently holding this parameter.
    owner: Option<u64>,
}

/// A named, typed command parameter.
///
/// A handle: clones are the same parameter, so a value written back after
/// execution is visible through every clone. Identity (for collection
/// membership) is the handle, not the name.
#[derive(Clone)]
pub struct OraParameter {
    inner: Arc<Mutex<ParameterInner>>,
}

fn infer_type(value: &Value) -> NativeType {
    match value {
        Value::Null | Value::String(_) => NativeType::VarChar,
        Value::Integer(_) => NativeType::Int32,
        Value::BigInt(_) => NativeType::Int64,
        Value::Double(_) => NativeType::Double,
        Value::Decimal(_) => NativeType::Number,
        Value::Binary(_) => NativeType::Raw,
        Value::Lob(_) => NativeType::Blob,
        Value::Cursor(_) => NativeType::Cursor,
    }
}

impl OraParameter {
    pub fn new(name: impl Into<String>, native_type: NativeType) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ParameterInner {
                name: name.into(),
                value: Value::Null,
                direction: ParameterDirection::In,
                native_type,
                size: 0,
                owner: None,
            })),
        }
    }

    /// Input parameter whose native type follows the value.
    pub fn with_value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let parameter = Self::new(name, infer_type(&value));
        parameter.set_value(value);
        parameter
    }

    pub fn direction_of(self, direction: ParameterDirection) -> Self {
        self.set_direction(direction);
        self
    }

    pub fn sized(self, size: usize) -> Self {
        self.set_size(size);
        self
    }

    fn lock(&self) -> MutexGuard<'_, ParameterInner> {
        // Plain data: a panic while holding the lock leaves nothing half-updated.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &OraParameter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.lock().name = name.into();
    }

    pub fn value(&self) -> Value {
        self.lock().value.clone()
    }

    pub fn set_value(&self, value: impl Into<Value>) {
        self.lock().value = value.into();
    }

    pub fn direction(&self) -> ParameterDirection {
        self.lock().direction
    }

    pub fn set_direction(&self, direction: ParameterDirection) {
        self.lock().direction = direction;
    }

    pub fn native_type(&self) -> NativeType {
        self.lock().native_type
    }

    pub fn set_native_type(&self, native_type: NativeType) {
        self.lock().native_type = native_type;
    }

    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn set_size(&self, size: usize) {
        self.lock().size = size;
    }

    /// Cursor-typed and written back by the server.
    pub fn is_output_cursor(&self) -> bool {
        let inner = self.lock();
        inner.native_type.is_cursor() && inner.direction.is_output()
    }

    pub(crate) fn owner(&self) -> Option<u64> {
        self.lock().owner
    }

    pub(crate) fn set_owner(&self, owner: Option<u64>) {
        self.lock().owner = owner;
    }

    /// Claims the parameter for `owner` unless another collection holds it.
    pub(crate) fn try_claim(&self, owner: u64) -> bool {
        let mut inner = self.lock();
        if inner.owner.is_some() {
            return false;
        }
        inner.owner = Some(owner);
        true
    }

    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }
}

impl fmt::Debug for OraParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("OraParameter")
            .field("name", &inner.name)
            .field("value", &inner.value)
            .field("direction", &inner.direction)
            .field("native_type", &inner.native_type)
            .field("size", &inner.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_infers_type() {
        assert_eq!(
            OraParameter::with_value("a", 1).native_type(),
            NativeType::Int32
        );
        assert_eq!(
            OraParameter::with_value("b", 1i64).native_type(),
            NativeType::Int64
        );
        assert_eq!(
            OraParameter::with_value("c", "x").native_type(),
            NativeType::VarChar
        );
        assert_eq!(
            OraParameter::with_value("d", vec![1u8]).native_type(),
            NativeType::Raw
        );
    }

    #[test]
    fn test_clones_share_state() {
        let p = OraParameter::new("p1", NativeType::VarChar);
        let q = p.clone();
        q.set_value("changed");
        assert_eq!(p.value(), Value::from("changed"));
        assert!(p.ptr_eq(&q));
        assert!(!p.ptr_eq(&OraParameter::new("p1", NativeType::VarChar)));
    }

    #[test]
    fn test_builder_helpers() {
        let p = OraParameter::new("cur", NativeType::Cursor)
            .direction_of(ParameterDirection::Out)
            .sized(10);
        assert_eq!(p.direction(), ParameterDirection::Out);
        assert_eq!(p.size(), 10);
        assert!(p.is_output_cursor());

        let input_cursor = OraParameter::new("cur", NativeType::Cursor);
        assert!(!input_cursor.is_output_cursor());
    }

    #[test]
    fn test_try_claim_is_exclusive() {
        let p = OraParameter::new("p", NativeType::Number);
        assert!(p.try_claim(1));
        assert!(!p.try_claim(2));
        assert_eq!(p.owner(), Some(1));
        p.set_owner(None);
        assert!(!p.is_owned());
    }
}

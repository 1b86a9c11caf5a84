//! Type descriptors and resolved layouts.
//!
//! Every host type that may cross the boundary implements [`Boundary`],
//! which describes it as a [`TypeDesc`]: a scalar, an enum, a pointer, a
//! sandbox function pointer, a fixed array, or a struct with an ordered
//! field table. Descriptors are resolved against a [`MachineModel`] into a
//! [`Layout`] once per side: the host layout is what Rust uses, the sandbox
//! layout is what sandboxed C code uses. The conversion engine only ever
//! looks at layouts.
//!
//! Struct layouts are resolved at registration and cached per sandbox in a
//! [`TypeRegistry`]. Resolving a struct that was never registered fails, so
//! missing layout metadata surfaces at first use.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use rampart_backend::{BackendError, IntRepr, MachineModel};

use crate::error::SandboxError;

/// Primitive host types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scalar {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    Isize,
    Usize,
    F32,
    F64,
}

impl Scalar {
    /// Layout of this scalar under `model`.
    pub fn layout(self, model: &MachineModel) -> Layout {
        match self {
            Scalar::Bool => Layout::Bool,
            Scalar::I8 => Layout::Int(IntRepr::signed(1)),
            Scalar::U8 => Layout::Int(IntRepr::unsigned(1)),
            Scalar::I16 => Layout::Int(model.short.for_host_sign(true)),
            Scalar::U16 => Layout::Int(model.short.for_host_sign(false)),
            Scalar::I32 => Layout::Int(model.int.for_host_sign(true)),
            Scalar::U32 => Layout::Int(model.int.for_host_sign(false)),
            Scalar::I64 => Layout::Int(model.long_long.for_host_sign(true)),
            Scalar::U64 => Layout::Int(model.long_long.for_host_sign(false)),
            Scalar::Isize => Layout::Int(model.long.for_host_sign(true)),
            Scalar::Usize => Layout::Int(model.size.for_host_sign(false)),
            Scalar::F32 => Layout::Float(4),
            Scalar::F64 => Layout::Float(8),
        }
    }
}

/// Description of a host type, as supplied by its [`Boundary`] impl.
#[derive(Debug, Clone)]
pub enum TypeDesc {
    Scalar(Scalar),
    /// A `sandbox_enum!` newtype. Enums only convert to the same enum.
    Enum { id: TypeId, name: &'static str },
    /// Pointer to the described type. Lazy so structs can point to themselves.
    Pointer(fn() -> TypeDesc),
    /// A raw sandbox function pointer, passed through without swizzling.
    Function,
    Array(Box<TypeDesc>, usize),
    Struct(StructDesc),
}

impl TypeDesc {
    pub fn name(&self) -> String {
        match self {
            TypeDesc::Scalar(s) => format!("{:?}", s),
            TypeDesc::Enum { name, .. } => name.to_string(),
            TypeDesc::Pointer(p) => format!("Ptr<{}>", p().name()),
            TypeDesc::Function => "SandboxFn".into(),
            TypeDesc::Array(elem, len) => format!("[{}; {}]", elem.name(), len),
            TypeDesc::Struct(s) => s.name.to_string(),
        }
    }

    /// True for types that cannot travel in a single argument word.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, TypeDesc::Array(..) | TypeDesc::Struct(_))
    }

    /// Host layout of a scalar or enum; `None` for everything else.
    pub fn host_scalar_layout(&self) -> Option<Layout> {
        let host = MachineModel::host();
        match self {
            TypeDesc::Scalar(s) => Some(s.layout(&host)),
            TypeDesc::Enum { id, name } => Some(Layout::Enum {
                id: *id,
                name,
                repr: host.int,
            }),
            _ => None,
        }
    }
}

/// Ordered field table of a struct.
#[derive(Debug, Clone, Copy)]
pub struct StructDesc {
    pub id: TypeId,
    pub name: &'static str,
    pub host_size: usize,
    pub host_align: usize,
    pub fields: &'static [FieldDesc],
}

/// One struct field.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc {
    pub name: &'static str,
    /// Offset in the host struct, from `offset_of!`.
    pub offset: usize,
    pub ty: fn() -> TypeDesc,
    pub id: fn() -> TypeId,
    /// Frozen fields are never written by the host.
    pub frozen: bool,
}

/// A host type whose values may be wrapped and sent across the boundary.
///
/// # Safety
///
/// `type_desc` must describe the type exactly. For structs, every field must
/// be listed with its true offset and type; conversion builds values field by
/// field, and any field left out would be left zeroed.
pub unsafe trait Boundary: Copy + 'static {
    fn type_desc() -> TypeDesc;
}

macro_rules! scalar_boundary {
    ($($ty:ty => $scalar:ident),* $(,)?) => {
        $(
            unsafe impl Boundary for $ty {
                fn type_desc() -> TypeDesc {
                    TypeDesc::Scalar(Scalar::$scalar)
                }
            }
        )*
    };
}

scalar_boundary! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    isize => Isize,
    usize => Usize,
    f32 => F32,
    f64 => F64,
}

unsafe impl<T: Boundary, const N: usize> Boundary for [T; N] {
    fn type_desc() -> TypeDesc {
        TypeDesc::Array(Box::new(T::type_desc()), N)
    }
}

/// A host address of sandbox-resident `T`.
///
/// Only the null pointer can be built directly. Every other value comes out
/// of the sandbox (allocation, a call result, a field read) and arrives
/// wrapped in [`Tainted`](crate::Tainted).
#[repr(transparent)]
pub struct Ptr<T> {
    addr: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T> Ptr<T> {
    pub const fn null() -> Self {
        Self {
            addr: 0,
            _ty: PhantomData,
        }
    }

    pub(crate) const fn from_addr(addr: usize) -> Self {
        Self {
            addr,
            _ty: PhantomData,
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr == 0
    }

    pub fn as_ptr(&self) -> *const T {
        self.addr as *const T
    }

    pub fn as_mut_ptr(&self) -> *mut T {
        self.addr as *mut T
    }
}

impl<T> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ptr<T> {}

impl<T> PartialEq for Ptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T> Eq for Ptr<T> {}

impl<T> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr({:#x})", self.addr)
    }
}

unsafe impl<T: Boundary> Boundary for Ptr<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::Pointer(T::type_desc)
    }
}

/// A sandbox function pointer exactly as sandboxed code stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SandboxFn(u64);

impl SandboxFn {
    pub const NULL: SandboxFn = SandboxFn(0);

    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

unsafe impl Boundary for SandboxFn {
    fn type_desc() -> TypeDesc {
        TypeDesc::Function
    }
}

/// Resolved representation of a type on one side of the boundary.
#[derive(Debug, Clone)]
pub enum Layout {
    /// One byte; any non-zero byte reads as `true`.
    Bool,
    Int(IntRepr),
    Float(u8),
    Enum {
        id: TypeId,
        name: &'static str,
        repr: IntRepr,
    },
    Pointer(u8),
    Function(u8),
    Array {
        elem: Box<Layout>,
        len: usize,
    },
    Struct(Arc<StructLayout>),
}

impl Layout {
    pub fn size(&self) -> usize {
        match self {
            Layout::Bool => 1,
            Layout::Int(r) | Layout::Enum { repr: r, .. } => r.bytes as usize,
            Layout::Float(b) | Layout::Pointer(b) | Layout::Function(b) => *b as usize,
            Layout::Array { elem, len } => elem.size() * len,
            Layout::Struct(s) => s.size,
        }
    }

    pub fn align(&self) -> usize {
        match self {
            Layout::Array { elem, .. } => elem.align(),
            Layout::Struct(s) => s.align,
            other => other.size().max(1),
        }
    }

    /// True if a value can be moved by plain byte copy: no pointers to
    /// swizzle, no booleans to normalise, no padding.
    pub fn is_plain(&self) -> bool {
        match self {
            Layout::Int(_) | Layout::Float(_) | Layout::Enum { .. } | Layout::Function(_) => true,
            Layout::Bool | Layout::Pointer(_) => false,
            Layout::Array { elem, .. } => elem.is_plain(),
            // Host padding bytes may be uninitialised.
            Layout::Struct(_) => false,
        }
    }

    /// True if both layouts place the same bytes at the same offsets.
    pub fn same_repr(&self, other: &Layout) -> bool {
        match (self, other) {
            (Layout::Bool, Layout::Bool) => true,
            (Layout::Int(a), Layout::Int(b)) => a == b,
            (Layout::Float(a), Layout::Float(b)) => a == b,
            (Layout::Enum { id: a, repr: ra, .. }, Layout::Enum { id: b, repr: rb, .. }) => {
                a == b && ra == rb
            }
            (Layout::Pointer(a), Layout::Pointer(b)) => a == b,
            (Layout::Function(a), Layout::Function(b)) => a == b,
            (Layout::Array { elem: a, len: la }, Layout::Array { elem: b, len: lb }) => {
                la == lb && a.same_repr(b)
            }
            (Layout::Struct(a), Layout::Struct(b)) => {
                a.size == b.size
                    && a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(fa, fb)| {
                        fa.offset == fb.offset && fa.layout.same_repr(&fb.layout)
                    })
            }
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Layout::Bool => "bool".into(),
            Layout::Int(r) => format!("{}{}", if r.signed { "i" } else { "u" }, r.bytes as u32 * 8),
            Layout::Float(b) => format!("f{}", *b as u32 * 8),
            Layout::Enum { name, .. } => name.to_string(),
            Layout::Pointer(b) => format!("ptr{}", *b as u32 * 8),
            Layout::Function(b) => format!("fnptr{}", *b as u32 * 8),
            Layout::Array { elem, len } => format!("[{}; {}]", elem.describe(), len),
            Layout::Struct(s) => s.name.to_string(),
        }
    }
}

/// Resolved struct layout.
#[derive(Debug)]
pub struct StructLayout {
    pub id: TypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    pub fields: Vec<FieldLayout>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldLayout {
    pub name: &'static str,
    pub offset: usize,
    pub layout: Layout,
    pub id: TypeId,
    pub frozen: bool,
}

/// Which side of the boundary a layout is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Sandbox,
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

#[derive(Debug, Clone)]
struct StructEntry {
    host: Arc<StructLayout>,
    sandbox: Arc<StructLayout>,
}

/// Per-sandbox cache of registered struct layouts, keyed by type.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    structs: RwLock<HashMap<TypeId, StructEntry>>,
}

fn poisoned() -> SandboxError {
    SandboxError::Backend(BackendError::Internal("type registry lock poisoned".into()))
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, id: TypeId) -> bool {
        self.structs.read().map(|s| s.contains_key(&id)).unwrap_or(false)
    }

    /// Register a struct and every struct it contains by value.
    ///
    /// Returns `false` if it was already registered. Pointed-to structs are
    /// not followed; they register separately when first needed.
    pub fn register(&self, desc: &StructDesc, model: &MachineModel) -> Result<bool, SandboxError> {
        if self.is_registered(desc.id) {
            return Ok(false);
        }
        for field in desc.fields {
            let mut nested = &(field.ty)();
            while let TypeDesc::Array(elem, _) = nested {
                nested = &**elem;
            }
            if let TypeDesc::Struct(inner) = nested {
                self.register(inner, model)?;
            }
        }

        let host = Arc::new(self.host_struct(desc)?);
        let sandbox = Arc::new(self.sandbox_struct(desc, model)?);
        let mut structs = self.structs.write().map_err(|_| poisoned())?;
        structs.insert(desc.id, StructEntry { host, sandbox });
        Ok(true)
    }

    fn host_struct(&self, desc: &StructDesc) -> Result<StructLayout, SandboxError> {
        let host_model = MachineModel::host();
        let mut fields = Vec::with_capacity(desc.fields.len());
        for field in desc.fields {
            let layout = self.layout(&(field.ty)(), Side::Host, &host_model)?;
            if field.offset + layout.size() > desc.host_size {
                return Err(SandboxError::usage(format!(
                    "field {}.{} extends past the end of the struct",
                    desc.name, field.name
                )));
            }
            fields.push(FieldLayout {
                name: field.name,
                offset: field.offset,
                layout,
                id: (field.id)(),
                frozen: field.frozen,
            });
        }
        Ok(StructLayout {
            id: desc.id,
            name: desc.name,
            size: desc.host_size,
            align: desc.host_align,
            fields,
        })
    }

    /// C layout: fields in order at their natural alignment, tail padded.
    fn sandbox_struct(&self, desc: &StructDesc, model: &MachineModel) -> Result<StructLayout, SandboxError> {
        let mut offset = 0;
        let mut align = 1;
        let mut fields = Vec::with_capacity(desc.fields.len());
        for field in desc.fields {
            let layout = self.layout(&(field.ty)(), Side::Sandbox, model)?;
            let a = layout.align();
            offset = round_up(offset, a);
            align = align.max(a);
            let size = layout.size();
            fields.push(FieldLayout {
                name: field.name,
                offset,
                layout,
                id: (field.id)(),
                frozen: field.frozen,
            });
            offset += size;
        }
        Ok(StructLayout {
            id: desc.id,
            name: desc.name,
            size: round_up(offset, align),
            align,
            fields,
        })
    }

    /// Resolve a descriptor to a layout on `side`.
    ///
    /// `model` is the sandbox model; host layouts always use the host model.
    pub fn layout(&self, desc: &TypeDesc, side: Side, model: &MachineModel) -> Result<Layout, SandboxError> {
        let host_model = MachineModel::host();
        let model = match side {
            Side::Host => &host_model,
            Side::Sandbox => model,
        };
        Ok(match desc {
            TypeDesc::Scalar(s) => s.layout(model),
            TypeDesc::Enum { id, name } => Layout::Enum {
                id: *id,
                name: *name,
                repr: model.int,
            },
            TypeDesc::Pointer(_) => Layout::Pointer(model.pointer.bytes),
            TypeDesc::Function => match side {
                Side::Host => Layout::Function(8),
                Side::Sandbox => Layout::Function(model.pointer.bytes),
            },
            TypeDesc::Array(elem, len) => Layout::Array {
                elem: Box::new(self.layout(elem, side, model)?),
                len: *len,
            },
            TypeDesc::Struct(s) => {
                let structs = self.structs.read().map_err(|_| poisoned())?;
                let entry = structs
                    .get(&s.id)
                    .ok_or(SandboxError::UnregisteredType(s.name))?;
                Layout::Struct(match side {
                    Side::Host => entry.host.clone(),
                    Side::Sandbox => entry.sandbox.clone(),
                })
            }
        })
    }
}

/// Implement [`Boundary`] for a struct from its field list.
///
/// The struct itself is declared separately and must derive `Clone` and
/// `Copy`. Every field must be listed. Prefix a field with `#[frozen]` to
/// stop the host from ever writing it.
///
/// ```
/// use rampart::{sandbox_struct, Ptr};
///
/// #[derive(Clone, Copy)]
/// struct Node {
///     value: u32,
///     next: Ptr<Node>,
/// }
///
/// sandbox_struct!(Node { value: u32, next: Ptr<Node> });
/// ```
#[macro_export]
macro_rules! sandbox_struct {
    ($name:ident { $($(#[$attr:ident])* $field:ident : $fty:ty),* $(,)? }) => {
        unsafe impl $crate::Boundary for $name {
            fn type_desc() -> $crate::TypeDesc {
                static FIELDS: &[$crate::FieldDesc] = &[
                    $(
                        $crate::FieldDesc {
                            name: ::core::stringify!($field),
                            offset: ::core::mem::offset_of!($name, $field),
                            ty: <$fty as $crate::Boundary>::type_desc,
                            id: ::core::any::TypeId::of::<$fty>,
                            frozen: $crate::__field_frozen!($($attr)*),
                        }
                    ),*
                ];
                $crate::TypeDesc::Struct($crate::StructDesc {
                    id: ::core::any::TypeId::of::<$name>(),
                    name: ::core::stringify!($name),
                    host_size: ::core::mem::size_of::<$name>(),
                    host_align: ::core::mem::align_of::<$name>(),
                    fields: FIELDS,
                })
            }
        }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __field_frozen {
    () => {
        false
    };
    (frozen) => {
        true
    };
}

/// Declare a C enum as a transparent `i32` newtype.
///
/// Every bit pattern is a valid value, so a discriminant read from the
/// sandbox can never produce an invalid host value. Use `is_known` after
/// verification to reject values outside the declared set.
#[macro_export]
macro_rules! sandbox_enum {
    ($(#[$meta:meta])* $vis:vis $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        $vis struct $name(pub i32);

        #[allow(non_upper_case_globals)]
        impl $name {
            $(pub const $variant: $name = $name($value);)+

            pub fn is_known(self) -> bool {
                matches!(self, $(Self::$variant)|+)
            }
        }

        unsafe impl $crate::Boundary for $name {
            fn type_desc() -> $crate::TypeDesc {
                $crate::TypeDesc::Enum {
                    id: ::core::any::TypeId::of::<$name>(),
                    name: ::core::stringify!($name),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Mixed {
        a: u64,
        p: Ptr<u8>,
        b: u32,
        bytes: [u8; 8],
        f: SandboxFn,
    }

    sandbox_struct!(Mixed { a: u64, p: Ptr<u8>, b: u32, bytes: [u8; 8], f: SandboxFn });

    #[derive(Clone, Copy)]
    struct Outer {
        tag: u8,
        inner: [Mixed; 2],
    }

    sandbox_struct!(Outer { tag: u8, inner: [Mixed; 2] });

    #[derive(Clone, Copy)]
    struct Guarded {
        magic: u32,
        len: u16,
    }

    sandbox_struct!(Guarded { #[frozen] magic: u32, len: u16 });

    sandbox_enum!(Color { Red = 0, Green = 1 });

    fn offsets(layout: &Layout) -> Vec<usize> {
        match layout {
            Layout::Struct(s) => s.fields.iter().map(|f| f.offset).collect(),
            _ => panic!("not a struct"),
        }
    }

    #[test]
    fn test_scalar_mapping_wasm32() {
        let m = MachineModel::wasm32();
        assert!(Scalar::Isize.layout(&m).same_repr(&Layout::Int(IntRepr::signed(4))));
        assert!(Scalar::Usize.layout(&m).same_repr(&Layout::Int(IntRepr::unsigned(4))));
        assert!(Scalar::U64.layout(&m).same_repr(&Layout::Int(IntRepr::unsigned(8))));
        assert!(Scalar::I8.layout(&m).same_repr(&Layout::Int(IntRepr::signed(1))));
    }

    #[test]
    fn test_unsigned_host_type_takes_slot_width() {
        let mut m = MachineModel::wasm32();
        m.short = IntRepr::signed(1);
        assert!(Scalar::I16.layout(&m).same_repr(&Layout::Int(IntRepr::signed(1))));
        assert!(Scalar::U16.layout(&m).same_repr(&Layout::Int(IntRepr::unsigned(1))));
    }

    #[test]
    fn test_wasm32_struct_layout() {
        let reg = TypeRegistry::new();
        let m = MachineModel::wasm32();
        let TypeDesc::Struct(desc) = Mixed::type_desc() else { panic!() };
        assert!(reg.register(&desc, &m).unwrap());
        assert!(!reg.register(&desc, &m).unwrap());

        let sbx = reg.layout(&Mixed::type_desc(), Side::Sandbox, &m).unwrap();
        assert_eq!(offsets(&sbx), vec![0, 8, 12, 16, 24]);
        assert_eq!(sbx.size(), 32);
        assert_eq!(sbx.align(), 8);

        let host = reg.layout(&Mixed::type_desc(), Side::Host, &m).unwrap();
        assert_eq!(host.size(), std::mem::size_of::<Mixed>());
        assert!(!host.same_repr(&sbx));
    }

    #[test]
    fn test_nested_registration() {
        let reg = TypeRegistry::new();
        let m = MachineModel::wasm32();
        let TypeDesc::Struct(desc) = Outer::type_desc() else { panic!() };
        reg.register(&desc, &m).unwrap();
        let TypeDesc::Struct(inner) = Mixed::type_desc() else { panic!() };
        assert!(reg.is_registered(inner.id));

        let sbx = reg.layout(&Outer::type_desc(), Side::Sandbox, &m).unwrap();
        assert_eq!(offsets(&sbx), vec![0, 8]);
        assert_eq!(sbx.size(), 8 + 2 * 32);
    }

    #[test]
    fn test_unregistered_struct() {
        let reg = TypeRegistry::new();
        let err = reg
            .layout(&Mixed::type_desc(), Side::Sandbox, &MachineModel::wasm32())
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnregisteredType("Mixed")));
    }

    #[test]
    fn test_frozen_flag_and_plainness() {
        let reg = TypeRegistry::new();
        let m = MachineModel::wasm32();
        let TypeDesc::Struct(desc) = Guarded::type_desc() else { panic!() };
        reg.register(&desc, &m).unwrap();
        let Layout::Struct(s) = reg.layout(&Guarded::type_desc(), Side::Sandbox, &m).unwrap() else {
            panic!()
        };
        assert!(s.field("magic").unwrap().frozen);
        assert!(!s.field("len").unwrap().frozen);
        assert!(!Layout::Struct(s.clone()).is_plain());
        assert_eq!(s.size, 8);
    }

    #[test]
    fn test_enum_newtype() {
        assert!(Color::Red.is_known());
        assert!(!Color(7).is_known());
        let m = MachineModel::wasm32();
        let reg = TypeRegistry::new();
        let layout = reg.layout(&Color::type_desc(), Side::Sandbox, &m).unwrap();
        assert_eq!(layout.size(), 4);
        assert!(layout.is_plain());
    }

    #[test]
    fn test_pointer_and_function_widths() {
        let reg = TypeRegistry::new();
        let m = MachineModel::wasm32();
        let p = reg.layout(&Ptr::<u32>::type_desc(), Side::Sandbox, &m).unwrap();
        let f = reg.layout(&SandboxFn::type_desc(), Side::Host, &m).unwrap();
        assert_eq!(p.size(), 4);
        assert_eq!(f.size(), 8);
        assert_eq!(Ptr::<Mixed>::type_desc().name(), "Ptr<Mixed>");
    }
}

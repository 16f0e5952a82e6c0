//! Describing data
//!
//! The core function of a message-passing runtime is getting data from point A to point B. The
//! runtime itself knows nothing about Rust types; it moves a start address, a number of elements
//! and a tag naming the element type on the wire. This module resolves Rust types into that
//! triplet.
//!
//! There are several pre-defined `SystemDatatype`s which directly correspond to Rust primitive
//! types, such as `F64` and `f64`. Those primitives implement `Elementary`. A direct relationship
//! between a Rust type and a contiguous run of one elementary type is covered by the unsafe
//! `Equivalence` trait: scalars are one element, arrays `[T; N]` are `N` times as many elements as
//! `T` and user structs can derive it (feature `derive`) when all of their fields share the same
//! element type.
//!
//! A `Buffer` describes a specific piece of data in memory that should be operated on: a value, a
//! slice or a `Vec` of `Equivalence` items. The untyped view handed to a runtime is a `DynBuffer`
//! (or `DynBufferMut` for receive buffers).
//!
//! Types without an `Equivalence` implementation cannot be passed to any collective; this is a
//! compile-time error, there is no runtime fallback.

use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::Range;
use std::os::raw::c_void;
use std::slice;

use crate::error::{Error, Result};

pub mod partition;

pub use self::partition::Partition;

/// Datatype traits
pub mod traits {
    pub use super::{
        Arithmetic, Bitwise, Buffer, BufferMut, Elementary, Equivalence, Logical, Ordered,
    };
}

/// A wire datatype tag understood by every runtime, e.g. `F64` for `f64`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SystemDatatype {
    /// `bool`, one byte holding 0 or 1
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// `Complex<f32>`, real part followed by imaginary part
    #[cfg(feature = "complex")]
    ComplexF32,
    /// `Complex<f64>`, real part followed by imaginary part
    #[cfg(feature = "complex")]
    ComplexF64,
}

impl SystemDatatype {
    /// Size in bytes of one element of this datatype
    pub const fn size(self) -> usize {
        use self::SystemDatatype::*;
        match self {
            Bool | I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 => 8,
            #[cfg(feature = "complex")]
            ComplexF32 => 8,
            #[cfg(feature = "complex")]
            ComplexF64 => 16,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// A primitive type that maps to exactly one `SystemDatatype`.
///
/// This trait is sealed, the set of elementary types is fixed by the wire datatypes.
pub trait Elementary: sealed::Sealed + Copy + Send + Sync + 'static {
    /// The wire datatype of this type
    const DATATYPE: SystemDatatype;
}

/// Elementary types on which `Sum` and `Product` are defined
pub trait Arithmetic: Elementary {}

/// Elementary types on which `Max` and `Min` are defined
pub trait Ordered: Elementary {}

/// Elementary types on which the logical operations are defined
pub trait Logical: Elementary {}

/// Elementary types on which the bitwise operations are defined
pub trait Bitwise: Elementary {}

/// A direct equivalence exists between the implementing type and a contiguous run of `COUNT`
/// elements of `Element`.
///
/// # Safety
///
/// Implementors must be laid out as exactly `COUNT` values of `Element` without any padding, i.e.
/// `size_of::<Self>() == COUNT * size_of::<Element>()`, and every combination of valid `Element`
/// values must be a valid value of `Self`.
pub unsafe trait Equivalence: Copy {
    /// The primitive type this type is composed of
    type Element: Elementary;
    /// Number of `Element`s in one value of this type
    const COUNT: usize;

    /// The wire datatype that is equivalent to this Rust type
    fn equivalent_datatype() -> SystemDatatype {
        <Self::Element as Elementary>::DATATYPE
    }
}

macro_rules! equivalent_system_datatype {
    ($rstype:ty, $tag:ident $(, $class:ident)*) => {
        impl sealed::Sealed for $rstype {}

        impl Elementary for $rstype {
            const DATATYPE: SystemDatatype = SystemDatatype::$tag;
        }

        $(impl $class for $rstype {})*

        unsafe impl Equivalence for $rstype {
            type Element = $rstype;
            const COUNT: usize = 1;
        }
    };
}

equivalent_system_datatype!(bool, Bool, Logical);

equivalent_system_datatype!(f32, F32, Arithmetic, Ordered);
equivalent_system_datatype!(f64, F64, Arithmetic, Ordered);

equivalent_system_datatype!(i8, I8, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(i16, I16, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(i32, I32, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(i64, I64, Arithmetic, Ordered, Logical, Bitwise);

equivalent_system_datatype!(u8, U8, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(u16, U16, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(u32, U32, Arithmetic, Ordered, Logical, Bitwise);
equivalent_system_datatype!(u64, U64, Arithmetic, Ordered, Logical, Bitwise);

#[cfg(target_pointer_width = "32")]
equivalent_system_datatype!(usize, U32, Arithmetic, Ordered, Logical, Bitwise);
#[cfg(target_pointer_width = "32")]
equivalent_system_datatype!(isize, I32, Arithmetic, Ordered, Logical, Bitwise);

#[cfg(target_pointer_width = "64")]
equivalent_system_datatype!(usize, U64, Arithmetic, Ordered, Logical, Bitwise);
#[cfg(target_pointer_width = "64")]
equivalent_system_datatype!(isize, I64, Arithmetic, Ordered, Logical, Bitwise);

#[cfg(feature = "complex")]
equivalent_system_datatype!(num_complex::Complex<f32>, ComplexF32, Arithmetic);
#[cfg(feature = "complex")]
equivalent_system_datatype!(num_complex::Complex<f64>, ComplexF64, Arithmetic);

unsafe impl<T, const N: usize> Equivalence for [T; N]
where
    T: Equivalence,
{
    type Element = T::Element;
    const COUNT: usize = N * T::COUNT;
}

/// A buffer is a region in memory holding a contiguous run of `Item`s.
///
/// Implemented for every `Equivalence` type (a single value), for slices and for `Vec`s of them.
pub trait Buffer {
    /// The type of the values held in the buffer
    type Item: Equivalence;

    /// The buffer contents as a slice of items
    fn as_items(&self) -> &[Self::Item];

    /// Number of primitive elements in the buffer
    fn count(&self) -> usize {
        self.as_items().len() * <Self::Item as Equivalence>::COUNT
    }

    /// The wire datatype of the buffer's elements
    fn as_datatype(&self) -> SystemDatatype {
        <Self::Item as Equivalence>::equivalent_datatype()
    }

    /// The untyped descriptor handed to a runtime
    fn as_dyn(&self) -> DynBuffer<'_> {
        DynBuffer::new(self.as_items())
    }
}

/// A mutable buffer is a region in memory holding a contiguous run of `Item`s that a runtime may
/// write to.
pub trait BufferMut: Buffer {
    /// The buffer contents as a mutable slice of items
    fn as_items_mut(&mut self) -> &mut [Self::Item];

    /// The untyped descriptor handed to a runtime
    fn as_dyn_mut(&mut self) -> DynBufferMut<'_> {
        DynBufferMut::new(self.as_items_mut())
    }
}

impl<T> Buffer for T
where
    T: Equivalence,
{
    type Item = T;
    fn as_items(&self) -> &[T] {
        slice::from_ref(self)
    }
}

impl<T> BufferMut for T
where
    T: Equivalence,
{
    fn as_items_mut(&mut self) -> &mut [T] {
        slice::from_mut(self)
    }
}

impl<T> Buffer for [T]
where
    T: Equivalence,
{
    type Item = T;
    fn as_items(&self) -> &[T] {
        self
    }
}

impl<T> BufferMut for [T]
where
    T: Equivalence,
{
    fn as_items_mut(&mut self) -> &mut [T] {
        self
    }
}

impl<T> Buffer for Vec<T>
where
    T: Equivalence,
{
    type Item = T;
    fn as_items(&self) -> &[T] {
        self
    }
}

impl<T> BufferMut for Vec<T>
where
    T: Equivalence,
{
    fn as_items_mut(&mut self) -> &mut [T] {
        self
    }
}

/// An immutable dynamically-typed buffer.
///
/// The buffer has a definite length and wire datatype, but it is not known which Rust type it
/// corresponds to. This is the analogue of `&Any` for runtimes.
#[derive(Copy, Clone)]
pub struct DynBuffer<'a> {
    bytes: &'a [u8],
    datatype: SystemDatatype,
}

impl<'a> DynBuffer<'a> {
    /// Creates a buffer from a slice with whose type has an equivalent datatype.
    pub fn new<T: Equivalence>(buf: &'a [T]) -> Self {
        // SAFETY: `Equivalence` guarantees `T` has no padding, so every byte is initialized.
        let bytes =
            unsafe { slice::from_raw_parts(buf.as_ptr() as *const u8, mem::size_of_val(buf)) };
        DynBuffer {
            bytes,
            datatype: T::equivalent_datatype(),
        }
    }

    /// Reinterprets raw bytes as elements of `datatype`.
    ///
    /// Returns `None` if `bytes` is not a whole number of elements.
    ///
    /// Runtimes copy these bytes into typed receive buffers, so tagging bytes is not possible
    /// from safe code:
    ///
    /// ```compile_fail
    /// use collectives::datatype::{DynBuffer, SystemDatatype};
    ///
    /// let invalid = DynBuffer::from_bytes(&[2u8], SystemDatatype::Bool);
    /// ```
    ///
    /// # Safety
    ///
    /// Every element of `bytes` must be a valid value of the Rust type behind `datatype`, e.g.
    /// only `0` and `1` for `SystemDatatype::Bool`.
    pub unsafe fn from_bytes(bytes: &'a [u8], datatype: SystemDatatype) -> Option<Self> {
        if bytes.len() % datatype.size() == 0 {
            Some(DynBuffer { bytes, datatype })
        } else {
            None
        }
    }

    /// The wire datatype of the elements
    pub fn datatype(&self) -> SystemDatatype {
        self.datatype
    }

    /// Number of elements in the buffer
    pub fn len(&self) -> usize {
        self.bytes.len() / self.datatype.size()
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The raw bytes of the buffer
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The bytes of the elements in `range`
    pub fn elements(&self, range: Range<usize>) -> &'a [u8] {
        let size = self.datatype.size();
        &self.bytes[range.start * size..range.end * size]
    }

    /// Pointer to the start of the buffer
    pub fn as_ptr(&self) -> *const c_void {
        self.bytes.as_ptr() as *const c_void
    }
}

impl<'a> fmt::Debug for DynBuffer<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DynBuffer")
            .field("datatype", &self.datatype)
            .field("len", &self.len())
            .finish()
    }
}

/// A mutable dynamically-typed buffer.
///
/// The buffer has a definite length and wire datatype, but it is not known which Rust type it
/// corresponds to. It either views initialized values (`new`) or fresh storage that the runtime is
/// expected to fill completely (`uninit`).
pub struct DynBufferMut<'a> {
    bytes: &'a mut [MaybeUninit<u8>],
    datatype: SystemDatatype,
    initialized: bool,
}

impl<'a> DynBufferMut<'a> {
    /// Creates a buffer over initialized values.
    pub fn new<T: Equivalence>(buf: &'a mut [T]) -> Self {
        let len = mem::size_of_val(buf);
        // SAFETY: `Equivalence` guarantees `T` has no padding; writes go through the unsafe
        // `write_at`, whose callers uphold the validity of the written values.
        let bytes =
            unsafe { slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, len) };
        DynBufferMut {
            bytes,
            datatype: T::equivalent_datatype(),
            initialized: true,
        }
    }

    /// Creates a buffer over uninitialized storage.
    pub fn uninit<T: Equivalence>(buf: &'a mut [MaybeUninit<T>]) -> Self {
        let len = mem::size_of_val(buf);
        // SAFETY: `MaybeUninit<u8>` has no validity requirements.
        let bytes =
            unsafe { slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, len) };
        DynBufferMut {
            bytes,
            datatype: T::equivalent_datatype(),
            initialized: false,
        }
    }

    /// The wire datatype of the elements
    pub fn datatype(&self) -> SystemDatatype {
        self.datatype
    }

    /// Number of elements in the buffer
    pub fn len(&self) -> usize {
        self.bytes.len() / self.datatype.size()
    }

    /// Whether the buffer holds no elements
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The current contents, if the buffer was created over initialized values.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        if self.initialized {
            // SAFETY: created from a slice of initialized, padding free values.
            Some(unsafe {
                slice::from_raw_parts(self.bytes.as_ptr() as *const u8, self.bytes.len())
            })
        } else {
            None
        }
    }

    /// Like `as_bytes()`, but reports uninitialized storage as an `Error`.
    pub fn initialized_bytes(&self) -> Result<&[u8]> {
        self.as_bytes()
            .ok_or_else(|| Error::Buffer("buffer contents are not initialized".into()))
    }

    /// Reborrow as an immutable `DynBuffer`, if the buffer is initialized.
    pub fn reborrow(&self) -> Option<DynBuffer<'_>> {
        let datatype = self.datatype;
        self.as_bytes().map(|bytes| DynBuffer { bytes, datatype })
    }

    /// Copies `bytes` into the buffer starting at element `offset`.
    ///
    /// Returns an error if the bytes are not a whole number of elements or do not fit.
    ///
    /// # Safety
    ///
    /// `bytes` must hold valid values of `self.datatype()`, e.g. bytes taken from a buffer of the
    /// same datatype or produced by a reduction on it.
    pub unsafe fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let size = self.datatype.size();
        let start = offset * size;
        if bytes.len() % size != 0 || start + bytes.len() > self.bytes.len() {
            return Err(Error::count(format!(
                "{} bytes at element {} do not fit a buffer of {} {:?} elements",
                bytes.len(),
                offset,
                self.len(),
                self.datatype
            )));
        }
        for (dst, &src) in self.bytes[start..start + bytes.len()].iter_mut().zip(bytes) {
            *dst = MaybeUninit::new(src);
        }
        Ok(())
    }

    /// Pointer to the start of the buffer
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        self.bytes.as_mut_ptr() as *mut c_void
    }
}

impl<'a> fmt::Debug for DynBufferMut<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DynBufferMut")
            .field("datatype", &self.datatype)
            .field("len", &self.len())
            .field("initialized", &self.initialized)
            .finish()
    }
}

/// Allocates `len` items, lets `fill` write all of them through a `DynBufferMut` and returns them.
///
/// Runtimes fill the whole receive buffer whenever they report success.
pub(crate) fn with_uninit_vec<T, F>(len: usize, fill: F) -> Result<Vec<T>>
where
    T: Equivalence,
    F: FnOnce(DynBufferMut<'_>) -> Result<()>,
{
    let mut buf: Vec<T> = Vec::with_capacity(len);
    fill(DynBufferMut::uninit(&mut buf.spare_capacity_mut()[..len]))?;
    // SAFETY: the runtime initialized all `len` items.
    unsafe { buf.set_len(len) };
    Ok(buf)
}

/// Like `with_uninit_vec()` for a single value.
pub(crate) fn with_uninit_value<T, F>(fill: F) -> Result<T>
where
    T: Equivalence,
    F: FnOnce(DynBufferMut<'_>) -> Result<()>,
{
    let mut value = MaybeUninit::<T>::uninit();
    fill(DynBufferMut::uninit(slice::from_mut(&mut value)))?;
    // SAFETY: the runtime initialized the value.
    Ok(unsafe { value.assume_init() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_are_single_elements() {
        let x = 3.5f64;
        assert_eq!(x.count(), 1);
        assert_eq!(x.as_datatype(), SystemDatatype::F64);
        assert_eq!(x.as_dyn().as_bytes(), &3.5f64.to_ne_bytes()[..]);
    }

    #[test]
    fn arrays_flatten_to_their_elements() {
        assert_eq!(<[u16; 3] as Equivalence>::COUNT, 3);
        assert_eq!(<[[i32; 2]; 4] as Equivalence>::COUNT, 8);
        assert_eq!(<[[i32; 2]; 4] as Equivalence>::equivalent_datatype(), SystemDatatype::I32);

        let v = vec![[1u16, 2, 3], [4, 5, 6]];
        assert_eq!(v.count(), 6);
        assert_eq!(v.as_dyn().len(), 6);
        assert_eq!(v.as_dyn().datatype(), SystemDatatype::U16);
    }

    #[test]
    fn pointer_sized_integers_use_fixed_width_tags() {
        assert_eq!(usize::DATATYPE.size(), mem::size_of::<usize>());
        assert_eq!(isize::DATATYPE.size(), mem::size_of::<isize>());
    }

    #[test]
    fn uninit_buffers_do_not_expose_contents() {
        let mut storage = [MaybeUninit::<u32>::uninit(); 2];
        let buf = DynBufferMut::uninit(&mut storage[..]);
        assert_eq!(buf.len(), 2);
        assert!(buf.as_bytes().is_none());
        assert!(buf.initialized_bytes().is_err());
    }

    #[test]
    fn writes_are_bounds_checked() {
        let mut values = [0i16; 3];
        let mut buf = DynBufferMut::new(&mut values[..]);
        let bytes = 7i16.to_ne_bytes();
        unsafe {
            buf.write_at(2, &bytes).unwrap();
            assert!(buf.write_at(3, &bytes).is_err());
            assert!(buf.write_at(0, &bytes[..1]).is_err());
        }
        assert_eq!(values, [0, 0, 7]);
    }

    #[test]
    fn uninit_vec_is_filled_by_the_callback() {
        let source = [1u8, 2, 3, 4];
        let filled: Vec<u8> =
            with_uninit_vec(4, |mut recv| unsafe { recv.write_at(0, &source) }).unwrap();
        assert_eq!(filled, source);

        let value: i64 =
            with_uninit_value(|mut recv| unsafe { recv.write_at(0, &(-9i64).to_ne_bytes()) })
                .unwrap();
        assert_eq!(value, -9);
    }

    #[test]
    fn from_bytes_rejects_partial_elements() {
        // SAFETY: every bit pattern is a valid `i32`
        unsafe {
            assert!(DynBuffer::from_bytes(&[0u8; 6], SystemDatatype::I32).is_none());
            assert_eq!(
                DynBuffer::from_bytes(&[0u8; 8], SystemDatatype::I32).unwrap().len(),
                2
            );
        }
    }
}

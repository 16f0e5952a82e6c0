//! Reduction operations
//!
//! An operation is selected by a zero-sized tag type such as `Sum` or `Max`. The tag resolves to a
//! `SystemOperation` handle at compile time, and it only implements `Operation<T>` for types whose
//! elements belong to the class the operation is defined on, so `Max` on a complex number or
//! `BitwiseAnd` on a float does not compile.
//!
//! The same handles drive the local reduction kernel used by `reduce_local_into()` and by runtimes
//! that reduce in process.

use crate::datatype::{
    Arithmetic, Bitwise, Buffer, BufferMut, Equivalence, Logical, Ordered, SystemDatatype,
};
use crate::error::{Error, Result};

/// A built-in reduction operation understood by every runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemOperation {
    /// Maximum
    Max,
    /// Minimum
    Min,
    /// Sum
    Sum,
    /// Product
    Product,
    /// Logical and
    LogicalAnd,
    /// Bitwise and
    BitwiseAnd,
    /// Logical or
    LogicalOr,
    /// Bitwise or
    BitwiseOr,
    /// Logical exclusive or
    LogicalXor,
    /// Bitwise exclusive or
    BitwiseXor,
}

impl SystemOperation {
    /// Returns whether the operation is commutative.
    ///
    /// All built-in operations are. Floating point sums and products are treated as commutative
    /// and associative, runtimes may combine them in any order.
    pub fn is_commutative(self) -> bool {
        true
    }
}

/// Resolves an operation tag to its native handle for values of type `T`.
pub trait Operation<T: Equivalence>: Copy {
    /// The handle passed to the runtime
    fn system_operation(&self) -> SystemOperation;
}

macro_rules! operation_tags {
    ($($(#[$attr:meta])* $tag:ident => $class:ident),* $(,)?) => {
        $(
            $(#[$attr])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
            pub struct $tag;

            impl<T> Operation<T> for $tag
            where
                T: Equivalence,
                T::Element: $class,
            {
                fn system_operation(&self) -> SystemOperation {
                    SystemOperation::$tag
                }
            }
        )*
    };
}

operation_tags! {
    /// Element-wise sum
    Sum => Arithmetic,
    /// Element-wise product
    Product => Arithmetic,
    /// Element-wise maximum
    Max => Ordered,
    /// Element-wise minimum
    Min => Ordered,
    /// Element-wise logical and, nonzero is true
    LogicalAnd => Logical,
    /// Element-wise logical or, nonzero is true
    LogicalOr => Logical,
    /// Element-wise logical exclusive or, nonzero is true
    LogicalXor => Logical,
    /// Element-wise bitwise and
    BitwiseAnd => Bitwise,
    /// Element-wise bitwise or
    BitwiseOr => Bitwise,
    /// Element-wise bitwise exclusive or
    BitwiseXor => Bitwise,
}

/// A handle can be passed directly. It is not checked against the element class at compile time,
/// a runtime reports `Error::Op` if the operation is not defined on `T`.
impl<T: Equivalence> Operation<T> for SystemOperation {
    fn system_operation(&self) -> SystemOperation {
        *self
    }
}

/// A primitive element that the local kernel can combine.
trait Element: Copy {
    const SIZE: usize;
    fn read(bytes: &[u8]) -> Self;
    fn write(self, bytes: &mut [u8]);
    fn operator(op: SystemOperation) -> Option<fn(Self, Self) -> Self>;
}

macro_rules! integer_element {
    ($($ty:ty),*) => {
        $(impl Element for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn write(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }

            fn operator(op: SystemOperation) -> Option<fn(Self, Self) -> Self> {
                let f: fn(Self, Self) -> Self = match op {
                    SystemOperation::Max => |a, b| a.max(b),
                    SystemOperation::Min => |a, b| a.min(b),
                    SystemOperation::Sum => |a, b| a.wrapping_add(b),
                    SystemOperation::Product => |a, b| a.wrapping_mul(b),
                    SystemOperation::LogicalAnd => |a, b| ((a != 0) && (b != 0)) as $ty,
                    SystemOperation::LogicalOr => |a, b| ((a != 0) || (b != 0)) as $ty,
                    SystemOperation::LogicalXor => |a, b| ((a != 0) != (b != 0)) as $ty,
                    SystemOperation::BitwiseAnd => |a, b| a & b,
                    SystemOperation::BitwiseOr => |a, b| a | b,
                    SystemOperation::BitwiseXor => |a, b| a ^ b,
                };
                Some(f)
            }
        })*
    };
}

integer_element!(i8, i16, i32, i64, u8, u16, u32, u64);

macro_rules! float_element {
    ($($ty:ty),*) => {
        $(impl Element for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn write(self, bytes: &mut [u8]) {
                bytes.copy_from_slice(&self.to_ne_bytes());
            }

            fn operator(op: SystemOperation) -> Option<fn(Self, Self) -> Self> {
                let f: fn(Self, Self) -> Self = match op {
                    SystemOperation::Max => |a, b| a.max(b),
                    SystemOperation::Min => |a, b| a.min(b),
                    SystemOperation::Sum => |a, b| a + b,
                    SystemOperation::Product => |a, b| a * b,
                    _ => return None,
                };
                Some(f)
            }
        })*
    };
}

float_element!(f32, f64);

impl Element for bool {
    const SIZE: usize = 1;

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }

    fn operator(op: SystemOperation) -> Option<fn(Self, Self) -> Self> {
        let f: fn(Self, Self) -> Self = match op {
            SystemOperation::LogicalAnd => |a, b| a && b,
            SystemOperation::LogicalOr => |a, b| a || b,
            SystemOperation::LogicalXor => |a, b| a != b,
            _ => return None,
        };
        Some(f)
    }
}

#[cfg(feature = "complex")]
macro_rules! complex_element {
    ($($ty:ty),*) => {
        $(impl Element for num_complex::Complex<$ty> {
            const SIZE: usize = 2 * <$ty as Element>::SIZE;

            fn read(bytes: &[u8]) -> Self {
                let (re, im) = bytes.split_at(<$ty as Element>::SIZE);
                num_complex::Complex::new(<$ty>::read(re), <$ty>::read(im))
            }

            fn write(self, bytes: &mut [u8]) {
                let (re, im) = bytes.split_at_mut(<$ty as Element>::SIZE);
                self.re.write(re);
                self.im.write(im);
            }

            fn operator(op: SystemOperation) -> Option<fn(Self, Self) -> Self> {
                let f: fn(Self, Self) -> Self = match op {
                    SystemOperation::Sum => |a, b| a + b,
                    SystemOperation::Product => |a, b| a * b,
                    _ => return None,
                };
                Some(f)
            }
        })*
    };
}

#[cfg(feature = "complex")]
complex_element!(f32, f64);

fn combine<E: Element>(
    op: SystemOperation,
    datatype: SystemDatatype,
    inbuf: &[u8],
    inoutbuf: &mut [u8],
) -> Result<()> {
    let f = E::operator(op).ok_or(Error::Op { op, datatype })?;
    for (a, b) in inbuf.chunks_exact(E::SIZE).zip(inoutbuf.chunks_exact_mut(E::SIZE)) {
        f(E::read(a), E::read(b)).write(b);
    }
    Ok(())
}

/// Combines two untyped buffers element by element, `inoutbuf[i] = inbuf[i] op inoutbuf[i]`.
///
/// Both buffers hold elements of `datatype` and have the same length.
pub(crate) fn reduce_bytes(
    op: SystemOperation,
    datatype: SystemDatatype,
    inbuf: &[u8],
    inoutbuf: &mut [u8],
) -> Result<()> {
    if inbuf.len() != inoutbuf.len() {
        return Err(Error::count(format!(
            "cannot combine {} bytes into {} bytes",
            inbuf.len(),
            inoutbuf.len()
        )));
    }
    use crate::datatype::SystemDatatype::*;
    match datatype {
        Bool => combine::<bool>(op, datatype, inbuf, inoutbuf),
        I8 => combine::<i8>(op, datatype, inbuf, inoutbuf),
        I16 => combine::<i16>(op, datatype, inbuf, inoutbuf),
        I32 => combine::<i32>(op, datatype, inbuf, inoutbuf),
        I64 => combine::<i64>(op, datatype, inbuf, inoutbuf),
        U8 => combine::<u8>(op, datatype, inbuf, inoutbuf),
        U16 => combine::<u16>(op, datatype, inbuf, inoutbuf),
        U32 => combine::<u32>(op, datatype, inbuf, inoutbuf),
        U64 => combine::<u64>(op, datatype, inbuf, inoutbuf),
        F32 => combine::<f32>(op, datatype, inbuf, inoutbuf),
        F64 => combine::<f64>(op, datatype, inbuf, inoutbuf),
        #[cfg(feature = "complex")]
        ComplexF32 => combine::<num_complex::Complex<f32>>(op, datatype, inbuf, inoutbuf),
        #[cfg(feature = "complex")]
        ComplexF64 => combine::<num_complex::Complex<f64>>(op, datatype, inbuf, inoutbuf),
    }
}

/// Perform a local reduction.
///
/// Combines `inbuf` into `inoutbuf` element by element, `inoutbuf[i] = inbuf[i] op inoutbuf[i]`,
/// without any communication. Integer sums and products wrap on overflow.
///
/// # Examples
///
/// See `demos/reduce.rs`
pub fn reduce_local_into<S: ?Sized, R: ?Sized, O>(inbuf: &S, inoutbuf: &mut R, op: O) -> Result<()>
where
    S: Buffer,
    R: BufferMut<Item = S::Item>,
    O: Operation<S::Item>,
{
    if inbuf.count() != inoutbuf.count() {
        return Err(Error::count(format!(
            "cannot combine {} elements into {} elements",
            inbuf.count(),
            inoutbuf.count()
        )));
    }
    let op = op.system_operation();
    let datatype = inbuf.as_datatype();
    let mut scratch = inoutbuf.as_dyn().as_bytes().to_vec();
    reduce_bytes(op, datatype, inbuf.as_dyn().as_bytes(), &mut scratch)?;
    // SAFETY: the kernel only produces valid values of `datatype`.
    unsafe { inoutbuf.as_dyn_mut().write_at(0, &scratch) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_resolve_to_handles() {
        assert_eq!(Operation::<i32>::system_operation(&Sum), SystemOperation::Sum);
        assert_eq!(Operation::<[f64; 3]>::system_operation(&Max), SystemOperation::Max);
        assert_eq!(Operation::<bool>::system_operation(&LogicalXor), SystemOperation::LogicalXor);
        assert_eq!(Operation::<u8>::system_operation(&BitwiseOr), SystemOperation::BitwiseOr);
        assert!(SystemOperation::Product.is_commutative());
    }

    #[test]
    fn local_sum_and_max() {
        let a = [1i32, 5, -3];
        let mut b = [10i32, 2, 4];
        reduce_local_into(&a[..], &mut b[..], Sum).unwrap();
        assert_eq!(b, [11, 7, 1]);

        let x = [1.5f64, -2.0];
        let mut y = [0.5f64, 3.0];
        reduce_local_into(&x[..], &mut y[..], Max).unwrap();
        assert_eq!(y, [1.5, 3.0]);
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let mut acc = 250u8;
        reduce_local_into(&10u8, &mut acc, Sum).unwrap();
        assert_eq!(acc, 4);
    }

    #[test]
    fn logical_operations_treat_nonzero_as_true() {
        let mut acc = [0i32, 3, 0];
        reduce_local_into(&[7i32, 2, 0][..], &mut acc[..], LogicalOr).unwrap();
        assert_eq!(acc, [1, 1, 0]);

        let mut flags = [true, false];
        reduce_local_into(&[true, true][..], &mut flags[..], LogicalXor).unwrap();
        assert_eq!(flags, [false, true]);
    }

    #[test]
    fn untyped_kernel_rejects_undefined_pairs() {
        let one = 1.0f64.to_ne_bytes();
        let mut two = 2.0f64.to_ne_bytes();
        let err = reduce_bytes(SystemOperation::BitwiseAnd, SystemDatatype::F64, &one, &mut two)
            .unwrap_err();
        assert_eq!(
            err,
            Error::Op {
                op: SystemOperation::BitwiseAnd,
                datatype: SystemDatatype::F64
            }
        );
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut acc = [0u16; 2];
        assert!(reduce_local_into(&[1u16, 2, 3][..], &mut acc[..], Sum).is_err());
    }
}

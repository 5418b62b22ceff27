// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel erasure: how typed user functions become the erased callables
//! stored in the catalog.
//!
//! User functions are plain Rust closures over product references. A small
//! fixed set of arity implementations (one through four parameters,
//! macro-generated) bridges them to the erased calling convention the
//! scheduler uses: a slice of type-erased products in declared-label order.
//! Downcast failures surface as `KernelError` and are fatal.

use std::any::Any;
use std::sync::Arc;

use crate::model::{ErasedProduct, ProductStore};

/// Failure inside an erased kernel call.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelError {
    /// The product at `index` was not of the type the kernel expects.
    ArgumentType { index: usize, expected: &'static str },
    /// A fold accumulator was not of the registered type.
    AccumulatorType { expected: &'static str },
    /// An unfold was seeded with a product of the wrong type.
    SeedType { expected: &'static str },
    /// Emitting a child store failed; the detail is the underlying error.
    EmitFailed { detail: String },
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::ArgumentType { index, expected } => {
                write!(f, "argument {} is not of type {}", index, expected)
            }
            KernelError::AccumulatorType { expected } => {
                write!(f, "accumulator is not of type {}", expected)
            }
            KernelError::SeedType { expected } => {
                write!(f, "seed product is not of type {}", expected)
            }
            KernelError::EmitFailed { detail } => write!(f, "emit failed: {}", detail),
        }
    }
}

impl std::error::Error for KernelError {}

/// Erased transform/predicate/observer call: products in, value out.
pub type ErasedCall<R> =
    Arc<dyn Fn(&[ErasedProduct]) -> Result<R, KernelError> + Send + Sync>;

/// Erased transform call after output splitting: products in, labeled
/// products out (in declared output order).
pub type TransformCall =
    Arc<dyn Fn(&[ErasedProduct]) -> Result<Vec<ErasedProduct>, KernelError> + Send + Sync>;

/// Erased predicate call.
pub type PredicateCall = ErasedCall<bool>;

/// Erased observer call.
pub type ObserverCall = ErasedCall<()>;

/// Erased fold step: mutates the accumulator in place.
pub type FoldCall = Arc<
    dyn Fn(&mut (dyn Any + Send + Sync), &[ErasedProduct]) -> Result<(), KernelError>
        + Send
        + Sync,
>;

/// Builds a fresh accumulator for a fold partition.
pub type FoldInit = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Erased output-sink call: the sink method sees the whole store.
pub type SinkCall = Arc<dyn Fn(&ProductStore) -> Result<(), KernelError> + Send + Sync>;

/// Erased unfold expansion: given the seed product, emits one chunk per
/// iteration through the callback and returns how many chunks were emitted.
pub type UnfoldCall = Arc<
    dyn Fn(
            &ErasedProduct,
            &mut dyn FnMut(ErasedProduct) -> Result<(), KernelError>,
        ) -> Result<usize, KernelError>
        + Send
        + Sync,
>;

fn downcast_arg<T: Send + Sync + 'static>(
    args: &[ErasedProduct],
    index: usize,
) -> Result<&T, KernelError> {
    args[index]
        .downcast_ref::<T>()
        .ok_or(KernelError::ArgumentType {
            index,
            expected: std::any::type_name::<T>(),
        })
}

/// A user function usable as a transform, predicate (`R = bool`), or
/// observer (`R = ()`) kernel. Implemented for `Fn(&A0, ..) -> R` up to
/// four parameters.
pub trait FunctionKernel<Args, R>: Send + Sync + 'static {
    /// Number of product parameters.
    fn arity(&self) -> usize;
    fn call(&self, args: &[ErasedProduct]) -> Result<R, KernelError>;
}

/// A user function usable as a fold kernel: `Fn(&mut R, &A0, ..)`. The
/// accumulator parameter does not count toward the arity.
pub trait AccumulateKernel<Args, R>: Send + Sync + 'static {
    fn arity(&self) -> usize;
    fn call(&self, accumulator: &mut R, args: &[ErasedProduct]) -> Result<(), KernelError>;
}

macro_rules! impl_function_kernels {
    ($( $len:literal => [ $( $arg:ident . $idx:tt ),+ ] );+ $(;)?) => {
        $(
            impl<F, R, $( $arg ),+> FunctionKernel<( $( $arg, )+ ), R> for F
            where
                F: Fn( $( &$arg ),+ ) -> R + Send + Sync + 'static,
                $( $arg: Send + Sync + 'static, )+
            {
                fn arity(&self) -> usize {
                    $len
                }

                fn call(&self, args: &[ErasedProduct]) -> Result<R, KernelError> {
                    Ok(self( $( downcast_arg::<$arg>(args, $idx)? ),+ ))
                }
            }

            impl<F, R, $( $arg ),+> AccumulateKernel<( $( $arg, )+ ), R> for F
            where
                F: Fn( &mut R, $( &$arg ),+ ) + Send + Sync + 'static,
                R: 'static,
                $( $arg: Send + Sync + 'static, )+
            {
                fn arity(&self) -> usize {
                    $len
                }

                fn call(
                    &self,
                    accumulator: &mut R,
                    args: &[ErasedProduct],
                ) -> Result<(), KernelError> {
                    self(accumulator, $( downcast_arg::<$arg>(args, $idx)? ),+ );
                    Ok(())
                }
            }
        )+
    };
}

impl_function_kernels! {
    1 => [A0.0];
    2 => [A0.0, A1.1];
    3 => [A0.0, A1.1, A2.2];
    4 => [A0.0, A1.1, A2.2, A3.3];
}

/// How a transform's return value maps onto its declared output labels.
///
/// Implemented for a single `&str` (the whole return value becomes one
/// product) and for tuples of `&str` (a tuple return value is split
/// elementwise). The splitter is returned as a plain function pointer so
/// the erased call stays `'static`.
pub trait OutputSpec<R> {
    fn labels(&self) -> Vec<String>;
    fn splitter(&self) -> fn(R) -> Vec<ErasedProduct>;
}

fn split_single<R: Send + Sync + 'static>(value: R) -> Vec<ErasedProduct> {
    vec![Arc::new(value)]
}

impl<'a, R: Send + Sync + 'static> OutputSpec<R> for &'a str {
    fn labels(&self) -> Vec<String> {
        vec![self.to_string()]
    }

    fn splitter(&self) -> fn(R) -> Vec<ErasedProduct> {
        split_single::<R>
    }
}

fn split_pair<X, Y>(value: (X, Y)) -> Vec<ErasedProduct>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
{
    vec![Arc::new(value.0), Arc::new(value.1)]
}

fn split_triple<X, Y, Z>(value: (X, Y, Z)) -> Vec<ErasedProduct>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    vec![Arc::new(value.0), Arc::new(value.1), Arc::new(value.2)]
}

impl<'a, X, Y> OutputSpec<(X, Y)> for (&'a str, &'a str)
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
{
    fn labels(&self) -> Vec<String> {
        vec![self.0.to_string(), self.1.to_string()]
    }

    fn splitter(&self) -> fn((X, Y)) -> Vec<ErasedProduct> {
        split_pair::<X, Y>
    }
}

impl<'a, X, Y, Z> OutputSpec<(X, Y, Z)> for (&'a str, &'a str, &'a str)
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    fn labels(&self) -> Vec<String> {
        vec![self.0.to_string(), self.1.to_string(), self.2.to_string()]
    }

    fn splitter(&self) -> fn((X, Y, Z)) -> Vec<ErasedProduct> {
        split_triple::<X, Y, Z>
    }
}

/// A stateful expansion: one object per unfold per identifier, constructed
/// lazily from the key product, stepped until its predicate says stop.
///
/// `from_seed` builds the generator from the key product; `initial` gives
/// the running value; while `keep_going` holds, `step` consumes the running
/// value and produces the next one plus the chunk to publish at the new
/// level.
pub trait Unfold: Send + Sync + Sized + 'static {
    type Seed: Send + Sync + 'static;
    type Value: Send;
    type Chunk: Send + Sync + 'static;

    fn from_seed(seed: &Self::Seed) -> Self;
    fn initial(&self) -> Self::Value;
    fn keep_going(&self, value: &Self::Value) -> bool;
    fn step(&self, value: Self::Value) -> (Self::Value, Self::Chunk);
}

/// Erases an `Unfold` implementation into the scheduler's calling
/// convention.
pub fn erase_unfold<U: Unfold>() -> UnfoldCall {
    Arc::new(|seed, emit| {
        let seed = seed.downcast_ref::<U::Seed>().ok_or(KernelError::SeedType {
            expected: std::any::type_name::<U::Seed>(),
        })?;
        let generator = U::from_seed(seed);
        let mut value = generator.initial();
        let mut emitted = 0usize;
        while generator.keep_going(&value) {
            let (next, chunk) = generator.step(value);
            emit(Arc::new(chunk))?;
            value = next;
            emitted += 1;
        }
        Ok(emitted)
    })
}

//! Interfaces of the engines consuming an instruction container.
//!
//! Stack-depth analysis and the final encoding are implemented elsewhere
//! (typically on top of a control-flow graph). This crate only hands them a
//! validated, legalized [`Bytecode`].
use crate::bytecode::Bytecode;

/// Computes the maximum stack depth reached by a routine.
pub trait StackDepthAnalyzer {
    type Error;

    /// Maximum stack depth of `code`.
    ///
    /// With `check_pre_and_post`, the analyzer also verifies that every
    /// instruction finds enough values on the stack before it runs.
    fn max_stack_depth(
        &self,
        code: &Bytecode,
        check_pre_and_post: bool,
    ) -> Result<u32, Self::Error>;
}

/// Turns a symbolic container into its fully offset-resolved encoded form.
pub trait Linearizer {
    type Output;
    type Error;

    fn linearize(&self, code: &Bytecode) -> Result<Self::Output, Self::Error>;
}

impl<T: StackDepthAnalyzer + ?Sized> StackDepthAnalyzer for &T {
    type Error = T::Error;

    fn max_stack_depth(
        &self,
        code: &Bytecode,
        check_pre_and_post: bool,
    ) -> Result<u32, Self::Error> {
        (**self).max_stack_depth(code, check_pre_and_post)
    }
}

impl<T: Linearizer + ?Sized> Linearizer for &T {
    type Output = T::Output;
    type Error = T::Error;

    fn linearize(&self, code: &Bytecode) -> Result<Self::Output, Self::Error> {
        (**self).linearize(code)
    }
}

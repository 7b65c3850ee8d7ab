// All of these expand to code that is type checked in every build, but only
// does anything when the "extra_assertions" feature is enabled.

macro_rules! extra_assert {
    ( $condition:expr $( , $args:expr )* ) => {
        if cfg!(feature = "extra_assertions") {
            assert!($condition $( , $args )*);
        }
    };
}

macro_rules! extra_assert_eq {
    ( $left:expr , $right:expr $( , $args:expr )* ) => {
        if cfg!(feature = "extra_assertions") {
            assert_eq!($left, $right $( , $args )*);
        }
    };
}

/// Define a function whose body only exists when the "extra_assertions"
/// feature is enabled. Otherwise it is an empty `#[inline(always)]` function
/// that disappears from the final artifact.
macro_rules! extra_only {
    (
        $( #[$attr:meta] )*
        fn $name:ident ( $( $arg:ident : $arg_ty:ty ),* $(,)* ) $body:block
    ) => {
        $( #[$attr] )*
        #[cfg(feature = "extra_assertions")]
        fn $name( $( $arg : $arg_ty ),* ) $body

        $( #[$attr] )*
        #[cfg(not(feature = "extra_assertions"))]
        #[inline(always)]
        #[allow(dead_code)]
        fn $name( $( $arg : $arg_ty ),* ) {
            $( let _ = $arg; )*
        }
    };
}

// Logging goes through the `log` facade only when the "log" feature is
// enabled. The logger must not allocate from the heap it is logging about.

#[cfg(feature = "log")]
macro_rules! heap_debug {
    ( $( $arg:tt )+ ) => {
        log::debug!(target: "pool_alloc", $( $arg )+)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! heap_debug {
    ( $( $arg:tt )+ ) => {
        if false {
            let _ = format_args!($( $arg )+);
        }
    };
}

#[cfg(feature = "log")]
macro_rules! heap_trace {
    ( $( $arg:tt )+ ) => {
        log::trace!(target: "pool_alloc", $( $arg )+)
    };
}

#[cfg(not(feature = "log"))]
macro_rules! heap_trace {
    ( $( $arg:tt )+ ) => {
        if false {
            let _ = format_args!($( $arg )+);
        }
    };
}

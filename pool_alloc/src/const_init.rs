/// Types with a `const` initial value, so that they can be placed directly in
/// a `static` (for example one registered as the `#[global_allocator]`).
pub(crate) trait ConstInit {
    /// The value a freshly created, not yet used `Self` starts from.
    const INIT: Self;
}

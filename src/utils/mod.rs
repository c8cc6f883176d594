pub(crate) mod http;
pub mod ids;

#[doc(hidden)]
pub mod test_support;

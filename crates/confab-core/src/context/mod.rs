mod provider;
mod augment;

pub use provider::{ContextProvider, HttpContextProvider};
pub use augment::{splice_context, Augmented, Augmenter};

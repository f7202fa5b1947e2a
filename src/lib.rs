pub mod form;
pub mod name_form;

pub use form::{FieldBinding, FormController, FormOptions, SubmitEvent};

mod binding;
mod controller;
mod validation;


pub use plainform_derive::FormModel;

pub use binding::{FieldBinding, FieldConfig, SubmitEvent, SubmitHandler};
pub use controller::{
    CriteriaMode, FieldKey, FieldMeta, FormController, FormError, FormId, FormOptions, FormResult,
    FormSnapshot, ObserverId, RevalidateMode, SubmitState, ValidationMode, ValidationTicket,
};
pub use validation::{
    ErrorMap, FieldError, FieldLens, FieldValidator, FormModel, Resolver, ResolverOutcome,
};

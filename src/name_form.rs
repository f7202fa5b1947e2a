//! The two-field name form: first/last name with required-field validation
//! supplied by a resolver, configured for validate-on-first-blur with
//! revalidation on blur and a short error-display delay.

use std::time::Duration;

use crate::form::{
    CriteriaMode, ErrorMap, FieldBinding, FieldError, FieldLens, FormController, FormModel,
    FormOptions, FormResult, ResolverOutcome, RevalidateMode, SubmitHandler, ValidationMode,
};

#[derive(Clone, Debug, Default, Eq, PartialEq, plainform_derive::FormModel)]
pub struct NameFormValues {
    pub first_name: String,
    pub last_name: String,
}

/// Auxiliary data handed to the resolver on every run. The name resolver
/// ignores it; the parameter stays part of the call contract.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NameFormContext {
    pub tag: i64,
}

impl Default for NameFormContext {
    fn default() -> Self {
        Self { tag: 1 }
    }
}

/// Accepts iff both names are non-empty. Emptiness is checked as-is, not
/// trimmed: whitespace-only input counts as present.
pub fn name_resolver(
    values: &NameFormValues,
    _context: &NameFormContext,
) -> ResolverOutcome<NameFormValues> {
    let fields = NameFormValues::fields();
    let mut errors = ErrorMap::for_model::<NameFormValues>();
    if values.first_name.is_empty() {
        errors.set(
            fields.first_name().key(),
            FieldError::required("First name is required"),
        );
    }
    if values.last_name.is_empty() {
        errors.set(
            fields.last_name().key(),
            FieldError::required("Last name is required"),
        );
    }
    let accepted = !values.first_name.is_empty() && !values.last_name.is_empty();
    ResolverOutcome {
        values: accepted.then(|| values.clone()),
        errors,
    }
}

/// The assembled demo form: controller plus the two field bindings a
/// presentation layer wires to its inputs.
pub struct NameForm {
    controller: FormController<NameFormValues, NameFormContext>,
    first_name: FieldBinding<String>,
    last_name: FieldBinding<String>,
}

impl NameForm {
    pub fn new() -> FormResult<Self> {
        let controller = FormController::new(
            NameFormValues::default(),
            NameFormContext::default(),
            FormOptions {
                mode: ValidationMode::OnTouched,
                revalidate_mode: RevalidateMode::OnBlur,
                criteria_mode: CriteriaMode::FirstError,
                delay_error: Duration::from_millis(1),
                focus_first_error_on_submit: true,
            },
        );
        controller.set_resolver(name_resolver)?;

        let fields = NameFormValues::fields();
        let first_name = controller.register(fields.first_name())?;
        let last_name = controller.register(fields.last_name())?;

        Ok(Self {
            controller,
            first_name,
            last_name,
        })
    }

    pub fn controller(&self) -> &FormController<NameFormValues, NameFormContext> {
        &self.controller
    }

    pub fn first_name(&self) -> &FieldBinding<String> {
        &self.first_name
    }

    pub fn last_name(&self) -> &FieldBinding<String> {
        &self.last_name
    }

    /// Submit handler whose valid branch only logs the accepted values.
    pub fn submit_handler(&self) -> SubmitHandler {
        self.controller.handle_submit(|values: &NameFormValues| {
            tracing::info!(
                first_name = %values.first_name,
                last_name = %values.last_name,
                "name form submitted"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use futures::executor::block_on;

    use super::*;
    use crate::form::SubmitEvent;

    fn values(first: &str, last: &str) -> NameFormValues {
        NameFormValues {
            first_name: first.to_string(),
            last_name: last.to_string(),
        }
    }

    #[test]
    fn resolver_accepts_when_both_names_present() {
        let input = values("Ada", "Lovelace");
        let outcome = name_resolver(&input, &NameFormContext::default());
        assert_eq!(outcome.values, Some(input));
        assert!(outcome.errors.is_clean());
    }

    #[test]
    fn resolver_rejects_missing_first_name() {
        let fields = NameFormValues::fields();
        let outcome = name_resolver(&values("", "Lovelace"), &NameFormContext::default());
        assert_eq!(outcome.values, None);
        let error = outcome
            .errors
            .get(fields.first_name().key())
            .expect("first name error present");
        assert_eq!(error.kind, FieldError::REQUIRED);
        assert_eq!(error.message, "First name is required");
        assert!(outcome.errors.get(fields.last_name().key()).is_none());
    }

    #[test]
    fn resolver_rejects_missing_last_name() {
        let fields = NameFormValues::fields();
        let outcome = name_resolver(&values("Ada", ""), &NameFormContext::default());
        assert_eq!(outcome.values, None);
        let error = outcome
            .errors
            .get(fields.last_name().key())
            .expect("last name error present");
        assert_eq!(error.kind, FieldError::REQUIRED);
        assert_eq!(error.message, "Last name is required");
        assert!(outcome.errors.get(fields.first_name().key()).is_none());
    }

    #[test]
    fn resolver_rejects_both_empty_with_both_errors() {
        let fields = NameFormValues::fields();
        let outcome = name_resolver(&values("", ""), &NameFormContext::default());
        assert_eq!(outcome.values, None);
        assert!(outcome.errors.get(fields.first_name().key()).is_some());
        assert!(outcome.errors.get(fields.last_name().key()).is_some());
    }

    #[test]
    fn resolver_is_idempotent() {
        let input = values("", "Lovelace");
        let context = NameFormContext::default();
        let first = name_resolver(&input, &context);
        let second = name_resolver(&input, &context);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.values, second.values);
    }

    #[test]
    fn resolver_treats_whitespace_only_as_present() {
        // Emptiness is not trimmed; this asserts the existing behavior.
        let input = values("  ", "Lovelace");
        let outcome = name_resolver(&input, &NameFormContext::default());
        assert_eq!(outcome.values, Some(input));
        assert!(outcome.errors.is_clean());
    }

    #[test]
    fn submit_with_both_empty_shows_both_errors_and_skips_on_valid() {
        let form = NameForm::new().expect("build form");
        let fields = NameFormValues::fields();
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = calls.clone();
            form.controller().handle_submit(move |_values| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        let mut event = SubmitEvent::new();
        let ran = handler.invoke(&mut event).expect("invoke submit");
        assert!(!ran);
        assert!(event.default_prevented());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let controller = form.controller();
        assert_eq!(
            controller
                .field_error_for_display(fields.first_name())
                .expect("display error"),
            Some("First name is required".to_string())
        );
        assert_eq!(
            controller
                .field_error_for_display(fields.last_name())
                .expect("display error"),
            Some("Last name is required".to_string())
        );
    }

    #[test]
    fn blur_on_empty_last_name_surfaces_only_its_error() {
        let form = NameForm::new().expect("build form");
        let fields = NameFormValues::fields();
        let controller = form.controller();

        form.first_name()
            .change("Ada".to_string())
            .expect("change first name");
        block_on(controller.touch_async(fields.last_name())).expect("blur last name");

        assert_eq!(
            controller
                .field_error_for_display(fields.last_name())
                .expect("display error"),
            Some("Last name is required".to_string())
        );
        assert_eq!(
            controller
                .field_error_for_display(fields.first_name())
                .expect("display error"),
            None
        );
    }

    #[test]
    fn valid_submit_calls_on_valid_once_with_current_values() {
        let form = NameForm::new().expect("build form");
        let submitted = Arc::new(Mutex::new(Vec::<NameFormValues>::new()));
        let handler = {
            let submitted = submitted.clone();
            form.controller().handle_submit(move |values: &NameFormValues| {
                submitted
                    .lock()
                    .expect("submitted values lock")
                    .push(values.clone());
            })
        };

        form.first_name()
            .change("Ada".to_string())
            .expect("change first name");
        form.last_name()
            .change("Lovelace".to_string())
            .expect("change last name");

        let mut event = SubmitEvent::new();
        let ran = handler.invoke(&mut event).expect("invoke submit");
        assert!(ran);

        let submitted = submitted.lock().expect("submitted values lock");
        assert_eq!(submitted.as_slice(), &[values("Ada", "Lovelace")]);
        let snapshot = form.controller().snapshot().expect("snapshot");
        assert!(snapshot.errors.is_clean());
    }

    #[test]
    fn whitespace_only_first_name_submits_successfully() {
        let form = NameForm::new().expect("build form");
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = calls.clone();
            form.controller().handle_submit(move |_values| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        form.first_name()
            .change("  ".to_string())
            .expect("change first name");
        form.last_name()
            .change("Lovelace".to_string())
            .expect("change last name");

        let mut event = SubmitEvent::new();
        let ran = handler.invoke(&mut event).expect("invoke submit");
        assert!(ran);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_submit_focuses_first_errored_field() {
        let form = NameForm::new().expect("build form");
        let focused = Arc::new(AtomicBool::new(false));
        {
            let focused = focused.clone();
            form.first_name()
                .attach(move || focused.store(true, Ordering::SeqCst))
                .expect("attach focus hook");
        }

        let handler = form.submit_handler();
        let mut event = SubmitEvent::new();
        let ran = handler.invoke(&mut event).expect("invoke submit");
        assert!(!ran);
        assert!(focused.load(Ordering::SeqCst));
    }

    #[test]
    fn bindings_expose_unconstrained_field_config() {
        let form = NameForm::new().expect("build form");
        let config = form.first_name().config();
        assert!(!config.required);
        assert!(!config.disabled);
        assert!(config.min_length.is_none());
        assert!(config.max_length.is_none());
        assert!(config.pattern.is_none());
        assert_eq!(form.first_name().name().as_str(), "first_name");
        assert_eq!(form.last_name().name().as_str(), "last_name");
    }
}

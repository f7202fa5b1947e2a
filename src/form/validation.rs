use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use futures_timer::Delay;

use super::controller::{
    CriteriaMode, FieldKey, FormController, FormResult, RevalidateMode, SyncFieldValidatorFn,
    ValidationMode, ValidationTicket, first_error_key, read_lock, write_lock,
};

/// One validation failure for one field. `kind` is a short machine-readable
/// tag, `message` the human-readable text the presentation layer shows.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldError {
    pub kind: String,
    pub message: String,
}

impl FieldError {
    pub const REQUIRED: &'static str = "required";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn required(message: impl Into<String>) -> Self {
        Self::new(Self::REQUIRED, message)
    }
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Error map over a model's fixed field set: every known key is always
/// present, mapped to an optional error. Writes to unknown keys are ignored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ErrorMap {
    entries: BTreeMap<FieldKey, Option<FieldError>>,
}

impl ErrorMap {
    pub fn for_keys(keys: &[FieldKey]) -> Self {
        Self {
            entries: keys.iter().map(|key| (*key, None)).collect(),
        }
    }

    pub fn for_model<T: FormModel>() -> Self {
        Self::for_keys(T::field_keys())
    }

    /// Returns false when `key` is not part of the map's field set.
    pub fn set(&mut self, key: FieldKey, error: FieldError) -> bool {
        match self.entries.get_mut(&key) {
            Some(slot) => {
                *slot = Some(error);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, key: FieldKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(slot) => {
                *slot = None;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: FieldKey) -> Option<&FieldError> {
        self.entries.get(&key).and_then(Option::as_ref)
    }

    pub fn is_clean(&self) -> bool {
        self.entries.values().all(Option::is_none)
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.entries.keys().copied()
    }

    /// Iterates only the entries that currently carry an error.
    pub fn present(&self) -> impl Iterator<Item = (FieldKey, &FieldError)> {
        self.entries
            .iter()
            .filter_map(|(key, slot)| slot.as_ref().map(|error| (*key, error)))
    }
}

pub trait FieldLens<T>: Copy + Send + Sync + 'static {
    type Value: Clone + PartialEq + Send + Sync + 'static;

    fn key(self) -> FieldKey;
    fn get<'a>(self, model: &'a T) -> &'a Self::Value;
    fn set(self, model: &mut T, value: Self::Value);
}

pub trait FormModel: Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;

    /// The fixed set of field keys; drives the [`ErrorMap`] shape.
    fn field_keys() -> &'static [FieldKey];
}

/// A single per-field rule, used when no resolver is installed.
pub trait FieldValidator<T, L>: Send + Sync
where
    L: FieldLens<T>,
{
    fn validate(&self, model: &T, value: &L::Value) -> Result<(), FieldError>;
}

impl<T, L, F> FieldValidator<T, L> for F
where
    L: FieldLens<T>,
    F: for<'a> Fn(&'a T, &'a L::Value) -> Result<(), FieldError> + Send + Sync,
{
    fn validate(&self, model: &T, value: &L::Value) -> Result<(), FieldError> {
        (self)(model, value)
    }
}

/// Whole-form validation: maps the current values plus an opaque context to
/// an accept/reject decision and a per-field error map. Pure and
/// synchronous; a panicking resolver is a programming error and propagates.
pub trait Resolver<T, C>: Send + Sync
where
    T: FormModel,
{
    fn resolve(&self, values: &T, context: &C) -> ResolverOutcome<T>;
}

impl<T, C, F> Resolver<T, C> for F
where
    T: FormModel,
    F: Fn(&T, &C) -> ResolverOutcome<T> + Send + Sync,
{
    fn resolve(&self, values: &T, context: &C) -> ResolverOutcome<T> {
        (self)(values, context)
    }
}

/// `values: Some(..)` echoes the accepted input; `None` signals rejection.
#[derive(Clone, Debug)]
pub struct ResolverOutcome<T> {
    pub values: Option<T>,
    pub errors: ErrorMap,
}

impl<T: FormModel> ResolverOutcome<T> {
    pub fn accept(values: T) -> Self {
        Self {
            values: Some(values),
            errors: ErrorMap::for_model::<T>(),
        }
    }

    pub fn reject(errors: ErrorMap) -> Self {
        Self {
            values: None,
            errors,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum ValidationTrigger {
    Change,
    Blur,
    Submit,
}

impl<T, C> FormController<T, C>
where
    T: FormModel,
    C: Send + Sync + 'static,
{
    pub fn register_field_validator<L, V>(&self, lens: L, validator: V) -> FormResult<()>
    where
        L: FieldLens<T>,
        V: FieldValidator<T, L> + 'static,
    {
        let key = lens.key();
        let validator = std::sync::Arc::new(validator);
        let wrapped: SyncFieldValidatorFn<T> =
            std::sync::Arc::new(move |model: &T| validator.validate(model, lens.get(model)));
        let mut validators =
            write_lock(&self.field_validators, "registering field validator")?;
        validators.entry(key).or_default().push(wrapped);
        Ok(())
    }

    /// Declares that validating `source` should also revalidate `dependent`
    /// (subject to the revalidate mode), e.g. password / confirm-password.
    pub fn register_dependency<S, D>(&self, source: S, dependent: D) -> FormResult<()>
    where
        S: FieldLens<T>,
        D: FieldLens<T>,
    {
        let mut dependencies = write_lock(&self.dependencies, "registering dependency")?;
        dependencies
            .entry(source.key())
            .or_default()
            .insert(dependent.key());
        Ok(())
    }

    /// Updates the stored value for one field and runs validation per the
    /// configured trigger policy. A new error may be staged rather than
    /// surfaced immediately when `delay_error` is non-zero.
    pub fn set<L>(&self, lens: L, value: L::Value) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "writing form values")?;
            lens.set(&mut state.values, value);
            let is_dirty = lens.get(&state.values) != lens.get(&state.initial);
            if is_dirty {
                state.dirty_fields.insert(key);
            } else {
                state.dirty_fields.remove(&key);
            }
            state.ensure_meta(key).dirty = is_dirty;
        }

        if self.wants_validation(key, ValidationTrigger::Change)? {
            let _ = self.validate_field_by_key(key, ValidationTrigger::Change)?;
        }
        self.revalidate_dependents(key, ValidationTrigger::Change)?;
        self.notify_observers()
    }

    /// Marks the field touched (first blur moves it out of pristine) and
    /// validates per the trigger policy.
    pub fn touch<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "touching field")?;
            state.ensure_meta(key).touched = true;
        }

        if self.wants_validation(key, ValidationTrigger::Blur)? {
            let _ = self.validate_field_by_key(key, ValidationTrigger::Blur)?;
        }
        self.revalidate_dependents(key, ValidationTrigger::Blur)?;
        self.notify_observers()
    }

    /// Like [`set`](Self::set), then waits out the error-display delay and
    /// surfaces whatever is still staged for the field.
    pub async fn set_async<L>(&self, lens: L, value: L::Value) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        self.set(lens, value)?;
        self.settle_pending(key).await
    }

    pub async fn touch_async<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        self.touch(lens)?;
        self.settle_pending(key).await
    }

    /// Surfaces a staged error for the field once the configured delay has
    /// elapsed, unless a newer validation run superseded it meanwhile.
    pub async fn settle_errors<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        self.settle_pending(lens.key()).await
    }

    /// Validates every field immediately (no staging) and reports overall
    /// validity. This is the submit-path validation.
    pub fn validate_all(&self) -> FormResult<bool> {
        let is_valid = self.validate_all_inner()?;
        self.notify_observers()?;
        Ok(is_valid)
    }

    pub fn validate_field<L>(&self, lens: L) -> FormResult<bool>
    where
        L: FieldLens<T>,
    {
        let is_valid = self.validate_field_by_key(lens.key(), ValidationTrigger::Submit)?;
        self.notify_observers()?;
        Ok(is_valid)
    }

    pub(super) fn validate_all_inner(&self) -> FormResult<bool> {
        let resolver = read_lock(&self.resolver, "reading resolver")?.clone();
        let values = read_lock(&self.state, "reading values for form validation")?
            .values
            .clone();
        let mut all_valid = true;

        if let Some(resolver) = resolver {
            let outcome = {
                let context = read_lock(&self.context, "reading validation context")?;
                resolver.resolve(&values, &context)
            };
            for key in T::field_keys() {
                let errors = outcome
                    .errors
                    .get(*key)
                    .cloned()
                    .map(|error| vec![error])
                    .unwrap_or_default();
                all_valid &= self.apply_field_errors(*key, errors, ValidationTrigger::Submit)?;
            }
            return Ok(all_valid);
        }

        let validators = read_lock(
            &self.field_validators,
            "reading field validators for form validation",
        )?
        .clone();
        let mut keys = validators.keys().copied().collect::<BTreeSet<FieldKey>>();
        keys.extend(
            read_lock(&self.state, "reading known keys for form validation")?
                .field_meta
                .keys()
                .copied(),
        );

        for key in keys {
            let mut errors = Vec::new();
            for validator in validators.get(&key).into_iter().flatten() {
                if let Err(error) = validator(&values) {
                    errors.push(error);
                    if self.options.criteria_mode == CriteriaMode::FirstError {
                        break;
                    }
                }
            }
            all_valid &= self.apply_field_errors(key, errors, ValidationTrigger::Submit)?;
        }
        Ok(all_valid)
    }

    pub(super) fn validate_field_by_key(
        &self,
        key: FieldKey,
        trigger: ValidationTrigger,
    ) -> FormResult<bool> {
        let errors = self.compute_field_errors(key)?;
        self.apply_field_errors(key, errors, trigger)
    }

    fn compute_field_errors(&self, key: FieldKey) -> FormResult<Vec<FieldError>> {
        let resolver = read_lock(&self.resolver, "reading resolver for field validation")?.clone();
        let values = read_lock(&self.state, "reading values for field validation")?
            .values
            .clone();

        if let Some(resolver) = resolver {
            let context = read_lock(&self.context, "reading validation context")?;
            let outcome = resolver.resolve(&values, &context);
            return Ok(outcome.errors.get(key).cloned().into_iter().collect());
        }

        let validators = read_lock(&self.field_validators, "reading field validators")?
            .get(&key)
            .cloned()
            .unwrap_or_default();
        let mut errors = Vec::new();
        for validator in validators {
            if let Err(error) = validator(&values) {
                errors.push(error);
                if self.options.criteria_mode == CriteriaMode::FirstError {
                    break;
                }
            }
        }
        Ok(errors)
    }

    /// Commits or stages a validation result for one field. Returns whether
    /// the field is valid (staging still reports invalid to callers).
    fn apply_field_errors(
        &self,
        key: FieldKey,
        errors: Vec<FieldError>,
        trigger: ValidationTrigger,
    ) -> FormResult<bool> {
        let mut state = write_lock(&self.state, "applying validation result")?;

        if errors.is_empty() {
            state.pending_errors.remove(&key);
            state.ensure_meta(key).errors.clear();
            state.first_error = first_error_key(&state.field_meta);
            return Ok(true);
        }

        let already_visible = state
            .field_meta
            .get(&key)
            .is_some_and(|meta| !meta.errors.is_empty());
        let stage = !self.options.delay_error.is_zero()
            && trigger != ValidationTrigger::Submit
            && !already_visible;

        if stage {
            let ticket = state.next_ticket(key);
            state.pending_errors.insert(key, (ticket, errors));
        } else {
            state.pending_errors.remove(&key);
            state.ensure_meta(key).errors = errors;
            state.first_error = first_error_key(&state.field_meta);
        }
        Ok(false)
    }

    pub(super) async fn settle_pending(&self, key: FieldKey) -> FormResult<()> {
        let staged = read_lock(&self.state, "reading staged errors")?
            .pending_errors
            .get(&key)
            .map(|(ticket, _)| *ticket);
        let Some(ticket) = staged else {
            return Ok(());
        };
        if !self.options.delay_error.is_zero() {
            Delay::new(self.options.delay_error).await;
        }
        self.commit_pending(key, ticket)
    }

    fn commit_pending(&self, key: FieldKey, ticket: ValidationTicket) -> FormResult<()> {
        let committed = {
            let mut state = write_lock(&self.state, "committing delayed errors")?;
            let staged = state.pending_errors.get(&key).map(|(ticket, _)| *ticket);
            if staged == Some(ticket) {
                if let Some((_, errors)) = state.pending_errors.remove(&key) {
                    state.ensure_meta(key).errors = errors;
                    state.first_error = first_error_key(&state.field_meta);
                }
                true
            } else {
                false
            }
        };
        if committed {
            self.notify_observers()?;
        }
        Ok(())
    }

    fn wants_validation(&self, key: FieldKey, trigger: ValidationTrigger) -> FormResult<bool> {
        let (touched, has_errors, submitted) = {
            let state = read_lock(&self.state, "reading validation policy inputs")?;
            let meta = state.field_meta.get(&key);
            (
                meta.is_some_and(|meta| meta.touched),
                meta.is_some_and(|meta| !meta.errors.is_empty())
                    || state.pending_errors.contains_key(&key),
                state.submit_count > 0,
            )
        };

        if has_errors || submitted {
            return Ok(matches!(
                (self.options.revalidate_mode, trigger),
                (RevalidateMode::OnChange, ValidationTrigger::Change)
                    | (RevalidateMode::OnBlur, ValidationTrigger::Blur)
            ));
        }
        Ok(match self.options.mode {
            ValidationMode::OnChange => trigger == ValidationTrigger::Change,
            ValidationMode::OnBlur => trigger == ValidationTrigger::Blur,
            ValidationMode::OnTouched => {
                trigger == ValidationTrigger::Blur
                    || (trigger == ValidationTrigger::Change && touched)
            }
            ValidationMode::OnSubmit => false,
        })
    }

    fn revalidate_dependents(
        &self,
        source: FieldKey,
        trigger: ValidationTrigger,
    ) -> FormResult<()> {
        let matches_mode = matches!(
            (self.options.revalidate_mode, trigger),
            (RevalidateMode::OnChange, ValidationTrigger::Change)
                | (RevalidateMode::OnBlur, ValidationTrigger::Blur)
        );
        if !matches_mode {
            return Ok(());
        }
        let dependents = read_lock(&self.dependencies, "reading field dependencies")?
            .get(&source)
            .cloned()
            .unwrap_or_default();
        for dependent in dependents {
            let _ = self.validate_field_by_key(dependent, trigger)?;
        }
        Ok(())
    }
}

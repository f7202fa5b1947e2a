use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::binding::FieldConfig;
use super::validation::{ErrorMap, FieldError, FieldLens, FormModel, Resolver};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);
static OBSERVER_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(value: &'static str) -> Self {
        Self(value)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Handle for one subscription created by [`FormController::subscribe`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObserverId(pub u64);

impl ObserverId {
    fn next() -> Self {
        Self(OBSERVER_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitState {
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

/// When a field is validated for the first time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValidationMode {
    OnChange,
    OnBlur,
    /// Validate on the first blur, then also on change for touched fields.
    OnTouched,
    OnSubmit,
}

/// When a field that already carries an error (or any field after the first
/// submit) is validated again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RevalidateMode {
    OnChange,
    OnBlur,
    OnSubmit,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CriteriaMode {
    /// Stop collecting errors for a field at the first failed rule.
    FirstError,
    All,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormOptions {
    pub mode: ValidationMode,
    pub revalidate_mode: RevalidateMode,
    pub criteria_mode: CriteriaMode,
    /// Interval a freshly appearing error is held back before it surfaces,
    /// so fast typing does not flicker error text in and out.
    pub delay_error: Duration,
    pub focus_first_error_on_submit: bool,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            mode: ValidationMode::OnSubmit,
            revalidate_mode: RevalidateMode::OnChange,
            criteria_mode: CriteriaMode::FirstError,
            delay_error: Duration::ZERO,
            focus_first_error_on_submit: true,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FieldMeta {
    pub dirty: bool,
    pub touched: bool,
    pub errors: Vec<FieldError>,
}

#[derive(Clone, Debug)]
pub struct FormSnapshot<T> {
    pub values: T,
    pub errors: ErrorMap,
    pub submit_state: SubmitState,
    pub submit_count: u32,
    pub is_dirty: bool,
    pub is_valid: bool,
    pub field_meta: BTreeMap<FieldKey, FieldMeta>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FormError {
    StatePoisoned(&'static str),
    InvalidStateTransition { from: SubmitState, to: SubmitState },
    AlreadySubmitting,
}

impl Display for FormError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormError::StatePoisoned(context) => {
                write!(f, "form state lock poisoned while {context}")
            }
            FormError::InvalidStateTransition { from, to } => {
                write!(f, "invalid submit state transition: {from:?} -> {to:?}")
            }
            FormError::AlreadySubmitting => f.write_str("form submit is already in progress"),
        }
    }
}

impl std::error::Error for FormError {}

pub type FormResult<T> = Result<T, FormError>;

pub(super) type SyncFieldValidatorFn<T> =
    Arc<dyn Fn(&T) -> Result<(), FieldError> + Send + Sync>;
pub(super) type FocusHandler = Arc<dyn Fn() + Send + Sync>;
pub(super) type ObserverFn<T> = Arc<dyn Fn(&FormSnapshot<T>) + Send + Sync>;

pub(super) struct FormState<T> {
    pub(super) id: FormId,
    pub(super) initial: T,
    pub(super) values: T,
    pub(super) submit_state: SubmitState,
    pub(super) submit_count: u32,
    pub(super) dirty_fields: BTreeSet<FieldKey>,
    pub(super) field_meta: BTreeMap<FieldKey, FieldMeta>,
    pub(super) pending_errors: BTreeMap<FieldKey, (ValidationTicket, Vec<FieldError>)>,
    pub(super) tickets: BTreeMap<FieldKey, ValidationTicket>,
    pub(super) first_error: Option<FieldKey>,
}

impl<T> FormState<T> {
    pub(super) fn ensure_meta(&mut self, key: FieldKey) -> &mut FieldMeta {
        self.field_meta.entry(key).or_default()
    }

    pub(super) fn next_ticket(&mut self, key: FieldKey) -> ValidationTicket {
        let next = ValidationTicket(
            self.tickets
                .get(&key)
                .copied()
                .unwrap_or(ValidationTicket(0))
                .0
                + 1,
        );
        self.tickets.insert(key, next);
        next
    }
}

/// Headless form controller: owns the current values, per-field
/// touched/dirty/error state and the validation trigger policy. Clones share
/// the same underlying form instance.
pub struct FormController<T, C = ()>
where
    T: FormModel,
    C: Send + Sync + 'static,
{
    pub(super) options: FormOptions,
    pub(super) state: Arc<RwLock<FormState<T>>>,
    pub(super) context: Arc<RwLock<C>>,
    pub(super) resolver: Arc<RwLock<Option<Arc<dyn Resolver<T, C>>>>>,
    pub(super) field_validators: Arc<RwLock<BTreeMap<FieldKey, Vec<SyncFieldValidatorFn<T>>>>>,
    pub(super) dependencies: Arc<RwLock<BTreeMap<FieldKey, BTreeSet<FieldKey>>>>,
    pub(super) focus_handlers: Arc<RwLock<BTreeMap<FieldKey, FocusHandler>>>,
    pub(super) field_configs: Arc<RwLock<BTreeMap<FieldKey, FieldConfig>>>,
    pub(super) observers: Arc<RwLock<BTreeMap<ObserverId, ObserverFn<T>>>>,
}

impl<T, C> Clone for FormController<T, C>
where
    T: FormModel,
    C: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            state: Arc::clone(&self.state),
            context: Arc::clone(&self.context),
            resolver: Arc::clone(&self.resolver),
            field_validators: Arc::clone(&self.field_validators),
            dependencies: Arc::clone(&self.dependencies),
            focus_handlers: Arc::clone(&self.focus_handlers),
            field_configs: Arc::clone(&self.field_configs),
            observers: Arc::clone(&self.observers),
        }
    }
}

impl<T, C> FormController<T, C>
where
    T: FormModel,
    C: Send + Sync + 'static,
{
    pub fn new(initial: T, context: C, options: FormOptions) -> Self {
        Self {
            options,
            state: Arc::new(RwLock::new(FormState {
                id: FormId::next(),
                initial: initial.clone(),
                values: initial,
                submit_state: SubmitState::Idle,
                submit_count: 0,
                dirty_fields: BTreeSet::new(),
                field_meta: BTreeMap::new(),
                pending_errors: BTreeMap::new(),
                tickets: BTreeMap::new(),
                first_error: None,
            })),
            context: Arc::new(RwLock::new(context)),
            resolver: Arc::new(RwLock::new(None)),
            field_validators: Arc::new(RwLock::new(BTreeMap::new())),
            dependencies: Arc::new(RwLock::new(BTreeMap::new())),
            focus_handlers: Arc::new(RwLock::new(BTreeMap::new())),
            field_configs: Arc::new(RwLock::new(BTreeMap::new())),
            observers: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn options(&self) -> FormOptions {
        self.options
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.state, "reading form id")?.id)
    }

    /// Installs the whole-form resolver. While a resolver is present it is
    /// the single source of validity; per-field validators are ignored.
    pub fn set_resolver<R>(&self, resolver: R) -> FormResult<()>
    where
        R: Resolver<T, C> + 'static,
    {
        let mut slot = write_lock(&self.resolver, "installing resolver")?;
        *slot = Some(Arc::new(resolver));
        Ok(())
    }

    pub fn replace_context(&self, context: C) -> FormResult<()> {
        *write_lock(&self.context, "replacing validation context")? = context;
        Ok(())
    }

    pub fn register_focus_handler<L>(
        &self,
        lens: L,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let mut handlers = write_lock(&self.focus_handlers, "registering focus handler")?;
        handlers.insert(lens.key(), Arc::new(handler));
        Ok(())
    }

    pub fn focus_first_error(&self) -> FormResult<bool> {
        let first_error = read_lock(&self.state, "reading first error key")?.first_error;
        let Some(key) = first_error else {
            return Ok(false);
        };
        let handler = read_lock(&self.focus_handlers, "reading focus handlers")?
            .get(&key)
            .cloned();
        if let Some(handler) = handler {
            handler();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Runs the submit pipeline: validate everything, and call `on_valid`
    /// with the current values only when the error map is clean. Returns
    /// whether `on_valid` ran. Validation failure is data, not an `Err`.
    pub fn submit(&self, on_valid: impl FnOnce(&T)) -> FormResult<bool> {
        {
            let mut state = write_lock(&self.state, "preparing submit")?;
            if state.submit_state == SubmitState::Submitting {
                return Err(FormError::AlreadySubmitting);
            }
            transition_submit_state(&mut state, SubmitState::Validating)?;
            state.submit_count = state.submit_count.saturating_add(1);
        }

        let is_valid = self.validate_all_inner()?;
        if !is_valid {
            {
                let mut state = write_lock(&self.state, "recording failed submit")?;
                transition_submit_state(&mut state, SubmitState::Failed)?;
            }
            if self.options.focus_first_error_on_submit {
                let _ = self.focus_first_error()?;
            }
            self.notify_observers()?;
            return Ok(false);
        }

        let values = {
            let mut state = write_lock(&self.state, "moving submit to submitting")?;
            transition_submit_state(&mut state, SubmitState::Submitting)?;
            state.values.clone()
        };
        on_valid(&values);
        {
            let mut state = write_lock(&self.state, "completing submit")?;
            transition_submit_state(&mut state, SubmitState::Succeeded)?;
        }
        self.notify_observers()?;
        Ok(true)
    }

    pub fn reset_to_initial(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "resetting form")?;
            state.values = state.initial.clone();
            state.submit_state = SubmitState::Idle;
            state.submit_count = 0;
            state.dirty_fields.clear();
            state.pending_errors.clear();
            state.tickets.clear();
            state.first_error = None;
            for meta in state.field_meta.values_mut() {
                meta.dirty = false;
                meta.touched = false;
                meta.errors.clear();
            }
        }
        self.notify_observers()
    }

    pub fn reset_field<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "resetting field")?;
            let initial_value = lens.get(&state.initial).clone();
            lens.set(&mut state.values, initial_value);
            state.dirty_fields.remove(&key);
            state.pending_errors.remove(&key);
            let meta = state.ensure_meta(key);
            meta.dirty = false;
            meta.touched = false;
            meta.errors.clear();
            state.first_error = first_error_key(&state.field_meta);
        }
        self.notify_observers()
    }

    pub fn clear_errors(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.state, "clearing all field errors")?;
            state.pending_errors.clear();
            for meta in state.field_meta.values_mut() {
                meta.errors.clear();
            }
            state.first_error = None;
        }
        self.notify_observers()
    }

    pub fn clear_field_errors<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "clearing field errors")?;
            state.pending_errors.remove(&key);
            if let Some(meta) = state.field_meta.get_mut(&key) {
                meta.errors.clear();
            }
            state.first_error = first_error_key(&state.field_meta);
        }
        self.notify_observers()
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot<T>> {
        let state = read_lock(&self.state, "creating form snapshot")?;
        let mut errors = ErrorMap::for_model::<T>();
        for (key, meta) in &state.field_meta {
            if let Some(error) = meta.errors.first() {
                errors.set(*key, error.clone());
            }
        }
        let is_valid = state.field_meta.values().all(|meta| meta.errors.is_empty());
        Ok(FormSnapshot {
            values: state.values.clone(),
            errors,
            submit_state: state.submit_state,
            submit_count: state.submit_count,
            is_dirty: !state.dirty_fields.is_empty(),
            is_valid,
            field_meta: state.field_meta.clone(),
        })
    }

    pub fn field_meta<L>(&self, lens: L) -> FormResult<Option<FieldMeta>>
    where
        L: FieldLens<T>,
    {
        Ok(read_lock(&self.state, "reading field meta")?
            .field_meta
            .get(&lens.key())
            .cloned())
    }

    /// Registers an observer that receives a fresh snapshot after every
    /// visible state change. Hosts re-query bindings and errors when
    /// notified.
    pub fn subscribe(
        &self,
        observer: impl Fn(&FormSnapshot<T>) + Send + Sync + 'static,
    ) -> FormResult<ObserverId> {
        let id = ObserverId::next();
        let mut observers = write_lock(&self.observers, "registering observer")?;
        observers.insert(id, Arc::new(observer));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> FormResult<bool> {
        let mut observers = write_lock(&self.observers, "removing observer")?;
        Ok(observers.remove(&id).is_some())
    }

    pub(super) fn notify_observers(&self) -> FormResult<()> {
        let snapshot = self.snapshot()?;
        let id = self.form_id()?;
        tracing::trace!(
            form = id.0,
            errors = ?snapshot.errors.present().collect::<Vec<_>>(),
            submit_state = ?snapshot.submit_state,
            "form state changed"
        );
        let observers = read_lock(&self.observers, "reading observers")?
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for observer in observers {
            observer(&snapshot);
        }
        Ok(())
    }
}

pub(super) fn transition_submit_state<T>(
    state: &mut FormState<T>,
    next: SubmitState,
) -> FormResult<()> {
    let current = state.submit_state;
    if current == next {
        return Ok(());
    }

    let allowed = matches!(
        (current, next),
        (SubmitState::Idle, SubmitState::Validating)
            | (SubmitState::Validating, SubmitState::Submitting)
            | (SubmitState::Validating, SubmitState::Failed)
            | (SubmitState::Submitting, SubmitState::Succeeded)
            | (SubmitState::Submitting, SubmitState::Failed)
            | (SubmitState::Succeeded, SubmitState::Validating)
            | (SubmitState::Failed, SubmitState::Validating)
            | (_, SubmitState::Idle)
    );
    if !allowed {
        return Err(FormError::InvalidStateTransition {
            from: current,
            to: next,
        });
    }
    state.submit_state = next;
    Ok(())
}

pub(super) fn first_error_key(field_meta: &BTreeMap<FieldKey, FieldMeta>) -> Option<FieldKey> {
    field_meta
        .iter()
        .find_map(|(key, meta)| (!meta.errors.is_empty()).then_some(*key))
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

use std::sync::Arc;

use super::controller::{FieldKey, FormController, FormResult, read_lock, write_lock};
use super::validation::{FieldLens, FormModel};

/// Constraint attributes passed through to the host's native input widget.
/// The controller does not enforce these; they mirror what the widget can
/// enforce itself (native validation).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldConfig {
    pub required: bool,
    pub disabled: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
}

type ChangeFn<V> = Arc<dyn Fn(V) -> FormResult<()> + Send + Sync>;
type BlurFn = Arc<dyn Fn() -> FormResult<()> + Send + Sync>;
type AttachFn = Arc<dyn Fn(Box<dyn Fn() + Send + Sync>) -> FormResult<()> + Send + Sync>;

/// Everything a presentation layer attaches to one input control: the field
/// name, the constraint passthrough, change/blur handlers and a hook for
/// wiring the underlying widget's focus behavior back to the controller.
pub struct FieldBinding<V> {
    name: FieldKey,
    config: FieldConfig,
    on_change: ChangeFn<V>,
    on_blur: BlurFn,
    on_attach: AttachFn,
}

impl<V> Clone for FieldBinding<V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            config: self.config.clone(),
            on_change: Arc::clone(&self.on_change),
            on_blur: Arc::clone(&self.on_blur),
            on_attach: Arc::clone(&self.on_attach),
        }
    }
}

impl<V> FieldBinding<V> {
    pub fn name(&self) -> FieldKey {
        self.name
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    /// Host change event: stores the new value for this field.
    pub fn change(&self, value: V) -> FormResult<()> {
        (self.on_change)(value)
    }

    /// Host blur event: marks the field touched and revalidates per policy.
    pub fn blur(&self) -> FormResult<()> {
        (self.on_blur)()
    }

    /// Ref-equivalent hook: registers the widget's focus closure so an
    /// invalid submit can move focus to the first errored field.
    pub fn attach(&self, focus: impl Fn() + Send + Sync + 'static) -> FormResult<()> {
        (self.on_attach)(Box::new(focus))
    }
}

/// A host-agnostic stand-in for the native submit event; the handler always
/// suppresses the default navigation.
#[derive(Debug, Default)]
pub struct SubmitEvent {
    default_prevented: bool,
}

impl SubmitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Reusable submit entry point produced by
/// [`FormController::handle_submit`].
#[derive(Clone)]
pub struct SubmitHandler {
    inner: Arc<dyn Fn(&mut SubmitEvent) -> FormResult<bool> + Send + Sync>,
}

impl SubmitHandler {
    /// Runs the submit pipeline; returns whether the valid branch ran.
    pub fn invoke(&self, event: &mut SubmitEvent) -> FormResult<bool> {
        (self.inner)(event)
    }
}

impl<T, C> FormController<T, C>
where
    T: FormModel,
    C: Send + Sync + 'static,
{
    /// Produces the binding descriptor for one field and makes sure the
    /// field participates in snapshots from now on.
    pub fn register<L>(&self, lens: L) -> FormResult<FieldBinding<L::Value>>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "registering field")?;
            state.ensure_meta(key);
        }
        let config = read_lock(&self.field_configs, "reading field config for binding")?
            .get(&key)
            .cloned()
            .unwrap_or_default();

        let on_change: ChangeFn<L::Value> = {
            let controller = self.clone();
            Arc::new(move |value: L::Value| controller.set(lens, value))
        };
        let on_blur: BlurFn = {
            let controller = self.clone();
            Arc::new(move || controller.touch(lens))
        };
        let on_attach: AttachFn = {
            let controller = self.clone();
            Arc::new(move |focus: Box<dyn Fn() + Send + Sync>| {
                controller.register_focus_handler(lens, focus)
            })
        };

        Ok(FieldBinding {
            name: key,
            config,
            on_change,
            on_blur,
            on_attach,
        })
    }

    /// Removes the field's registration state and restores its initial
    /// value, mirroring unmount-with-unregister semantics.
    pub fn unregister<L>(&self, lens: L) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let key = lens.key();
        {
            let mut state = write_lock(&self.state, "unregistering field")?;
            let initial_value = lens.get(&state.initial).clone();
            lens.set(&mut state.values, initial_value);
            state.dirty_fields.remove(&key);
            state.field_meta.remove(&key);
            state.pending_errors.remove(&key);
            state.tickets.remove(&key);
            state.first_error = super::controller::first_error_key(&state.field_meta);
        }
        write_lock(&self.field_configs, "clearing field config")?.remove(&key);
        write_lock(&self.focus_handlers, "clearing focus handler")?.remove(&key);
        write_lock(&self.field_validators, "clearing field validators")?.remove(&key);
        self.notify_observers()
    }

    pub fn configure_field<L>(&self, lens: L, config: FieldConfig) -> FormResult<()>
    where
        L: FieldLens<T>,
    {
        let mut configs = write_lock(&self.field_configs, "configuring field")?;
        configs.insert(lens.key(), config);
        Ok(())
    }

    pub fn field_config<L>(&self, lens: L) -> FormResult<Option<FieldConfig>>
    where
        L: FieldLens<T>,
    {
        Ok(read_lock(&self.field_configs, "reading field config")?
            .get(&lens.key())
            .cloned())
    }

    /// Builds the submit handler the host wires to its submit control. The
    /// handler consumes the event (prevents default navigation), validates
    /// everything, and calls `on_valid` with the current values only when
    /// the form is clean.
    pub fn handle_submit<F>(&self, on_valid: F) -> SubmitHandler
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let controller = self.clone();
        let on_valid = Arc::new(on_valid);
        SubmitHandler {
            inner: Arc::new(move |event: &mut SubmitEvent| {
                event.prevent_default();
                let on_valid = Arc::clone(&on_valid);
                controller.submit(move |values| on_valid(values))
            }),
        }
    }

    /// Error text for the presentation layer. Hidden until the field has
    /// been touched or a submit happened, so pristine forms never show
    /// errors.
    pub fn field_error_for_display<L>(&self, lens: L) -> FormResult<Option<String>>
    where
        L: FieldLens<T>,
    {
        let state = read_lock(&self.state, "reading display error message")?;
        let Some(meta) = state.field_meta.get(&lens.key()) else {
            return Ok(None);
        };
        if !meta.touched && state.submit_count == 0 {
            return Ok(None);
        }
        Ok(meta.errors.first().map(|error| error.message.clone()))
    }
}

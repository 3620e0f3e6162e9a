//! The field module: owner of identifiers, change notification and evaluation settings.

use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldId};
use crate::field_cache::FieldCache;
use crate::settings::EvaluationSettings;
use crate::traits::FieldOperator;
use anyhow::{bail, Context};
use log::debug;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Delivered to change callbacks once the outermost change bracket closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldModuleEvent {
    pub changed: Vec<FieldId>,
}

impl FieldModuleEvent {
    pub fn contains(&self, id: FieldId) -> bool {
        self.changed.contains(&id)
    }

    /// Whether `field` or anything it is computed from changed.
    pub fn affects(&self, field: &Field) -> bool {
        self.contains(field.id()) || field.sources().iter().any(|s| self.affects(s))
    }
}

type ChangeCallback = Arc<dyn Fn(&FieldModuleEvent) + Send + Sync>;

#[derive(Default)]
struct ChangeState {
    depth: usize,
    pending: BTreeSet<FieldId>,
}

pub(crate) struct ModuleState {
    next_id: AtomicU64,
    revision: AtomicU64,
    changes: Mutex<ChangeState>,
    callbacks: Mutex<Vec<ChangeCallback>>,
    settings: RwLock<EvaluationSettings>,
}

impl ModuleState {
    fn new(settings: EvaluationSettings) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            revision: AtomicU64::new(0),
            changes: Mutex::new(ChangeState::default()),
            callbacks: Mutex::new(Vec::new()),
            settings: RwLock::new(settings),
        }
    }

    /// Records a modification: live caches go stale now, callbacks fire when no bracket is open.
    pub(crate) fn notify_change(&self, id: FieldId) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        let deliver = {
            let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
            if changes.depth > 0 {
                changes.pending.insert(id);
                None
            } else {
                Some(vec![id])
            }
        };
        if let Some(changed) = deliver {
            self.deliver(FieldModuleEvent { changed });
        }
    }

    fn deliver(&self, event: FieldModuleEvent) {
        let callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!("field module change: {:?}", event.changed);
        for callback in callbacks {
            callback(&event);
        }
    }
}

/// Shared handle to a set of fields that can be combined with one another.
#[derive(Clone)]
pub struct FieldModule {
    state: Arc<ModuleState>,
}

impl Default for FieldModule {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldModule {
    pub fn new() -> Self {
        Self::with_settings(EvaluationSettings::default())
    }

    pub fn with_settings(settings: EvaluationSettings) -> Self {
        Self {
            state: Arc::new(ModuleState::new(settings)),
        }
    }

    pub(crate) fn from_state(state: Arc<ModuleState>) -> Self {
        Self { state }
    }

    pub fn settings(&self) -> EvaluationSettings {
        *self
            .state
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the settings used by caches created from now on.
    pub fn set_settings(&self, settings: EvaluationSettings) -> Result<()> {
        settings.validate()?;
        *self
            .state
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
        Ok(())
    }

    /// Counter bumped by every field modification.
    pub fn revision(&self) -> u64 {
        self.state.revision.load(Ordering::SeqCst)
    }

    pub fn owns(&self, field: &Field) -> bool {
        Arc::ptr_eq(&self.state, field.module_state())
    }

    pub fn begin_change(&self) {
        let mut changes = self
            .state
            .changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        changes.depth += 1;
    }

    /// Closes a change bracket, delivering queued notifications when it was the outermost.
    pub fn end_change(&self) -> Result<()> {
        let pending = {
            let mut changes = self
                .state
                .changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if changes.depth == 0 {
                return Err(FieldError::InvalidArgument(
                    "end_change called without matching begin_change".into(),
                ));
            }
            changes.depth -= 1;
            if changes.depth == 0 {
                std::mem::take(&mut changes.pending)
            } else {
                BTreeSet::new()
            }
        };
        if !pending.is_empty() {
            self.state.deliver(FieldModuleEvent {
                changed: pending.into_iter().collect(),
            });
        }
        Ok(())
    }

    /// Opens a change bracket closed when the guard drops.
    pub fn change_guard(&self) -> ChangeGuard {
        self.begin_change();
        ChangeGuard {
            module: self.clone(),
        }
    }

    pub fn add_change_callback<F>(&self, callback: F)
    where
        F: Fn(&FieldModuleEvent) + Send + Sync + 'static,
    {
        self.state
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn create_field_cache(&self) -> FieldCache {
        FieldCache::new(self)
    }

    pub(crate) fn check_source(&self, source: &Field) -> Result<()> {
        if self.owns(source) {
            Ok(())
        } else {
            Err(FieldError::DifferentModule(source.name()))
        }
    }

    pub(crate) fn create_field(
        &self,
        component_count: usize,
        sources: Vec<Field>,
        source_values: Vec<f64>,
        operator: impl FieldOperator,
    ) -> Result<Field> {
        if component_count == 0 {
            return Err(FieldError::InvalidArgument(
                "fields need at least one component".into(),
            ));
        }
        for source in &sources {
            self.check_source(source)?;
        }
        let id = FieldId(self.state.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(Field::new(
            self.state.clone(),
            id,
            component_count,
            sources,
            source_values,
            Box::new(operator),
        ))
    }

    /// Evaluates `field` in `cache` and returns a copy of its values.
    pub fn evaluate_real(&self, field: &Field, cache: &FieldCache) -> anyhow::Result<Vec<f64>> {
        let values = cache
            .evaluate(field)
            .with_context(|| format!("Failed to evaluate field {}.", field.name()))?;
        let values = values.borrow().values.clone();
        Ok(values)
    }

    pub fn evaluate_derivative_real(
        &self,
        field: &Field,
        cache: &FieldCache,
        derivative: &FieldDerivative,
    ) -> anyhow::Result<Vec<f64>> {
        let values = cache.evaluate_derivative(field, derivative).with_context(|| {
            format!(
                "Failed to evaluate derivative {} of field {}.",
                derivative,
                field.name()
            )
        })?;
        let values = values.borrow().values.clone();
        Ok(values)
    }

    /// Assigns `values` to `field` in one change bracket; fails if nothing could be written.
    pub fn assign_real(
        &self,
        field: &Field,
        cache: &FieldCache,
        values: &[f64],
    ) -> anyhow::Result<AssignmentResult> {
        let _changes = self.change_guard();
        match cache.assign(field, values) {
            AssignmentResult::Fail => bail!("Failed to assign values to field {}.", field.name()),
            result => Ok(result),
        }
    }
}

/// Keeps a change bracket open for its lifetime.
pub struct ChangeGuard {
    module: FieldModule,
}

impl Drop for ChangeGuard {
    fn drop(&mut self) {
        if let Err(err) = self.module.end_change() {
            debug!("closing change bracket: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn recording(module: &FieldModule) -> Arc<Mutex<Vec<FieldModuleEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        module.add_change_callback(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn nested_changes_notify_once_when_outermost_closes() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0]).unwrap();
        let b = module.create_constant(&[2.0]).unwrap();
        let events = recording(&module);

        module.begin_change();
        module.begin_change();
        a.set_scalar_parameters(&[3.0]).unwrap();
        b.set_scalar_parameters(&[4.0]).unwrap();
        a.set_scalar_parameters(&[5.0]).unwrap();
        module.end_change().unwrap();
        assert!(events.lock().unwrap().is_empty());
        module.end_change().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].changed, vec![a.id(), b.id()]);
    }

    #[test]
    fn unbalanced_end_change_is_an_error() {
        let module = FieldModule::new();
        assert!(matches!(
            module.end_change(),
            Err(FieldError::InvalidArgument(_))
        ));
    }

    #[test]
    fn events_report_affected_dependants() {
        let module = FieldModule::new();
        let a = module.create_constant(&[1.0]).unwrap();
        let b = module.create_constant(&[1.0]).unwrap();
        let scaled = module.create_scale(&a, &[2.0]).unwrap();
        let events = recording(&module);
        a.set_scalar_parameters(&[7.0]).unwrap();
        let events = events.lock().unwrap();
        assert!(events[0].affects(&scaled));
        assert!(!events[0].affects(&b));
    }

    #[test]
    fn convenience_entry_points_name_the_failing_field() {
        let module = FieldModule::new();
        let xi = module.create_xi_coordinates(2).unwrap();
        xi.set_name("xi");
        let cache = module.create_field_cache();
        assert_err_contains(module.evaluate_real(&xi, &cache), "field xi");
        let time = module.create_time().unwrap();
        assert_err_contains(module.assign_real(&time, &cache, &[1.0]), "Failed to assign");
    }

    #[test]
    fn rejects_invalid_settings() {
        let module = FieldModule::new();
        let mut settings = EvaluationSettings::default();
        settings.eigen.max_sweeps = 0;
        assert!(module.set_settings(settings).is_err());
        settings.eigen.max_sweeps = 10;
        module.set_settings(settings).unwrap();
        assert_eq!(module.create_field_cache().settings().eigen.max_sweeps, 10);
    }

    #[test]
    fn factories_reject_sources_from_other_modules() {
        let module = FieldModule::new();
        let other = FieldModule::new();
        let foreign = other.create_constant(&[1.0, 2.0]).unwrap();
        assert!(matches!(
            module.create_scale(&foreign, &[1.0, 1.0]),
            Err(FieldError::DifferentModule(_))
        ));
    }
}

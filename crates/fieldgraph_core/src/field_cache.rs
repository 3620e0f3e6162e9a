//! Evaluation context: binds a domain location and memoizes every value and derivative
//! computed there.
//!
//! Each entry records the location counter it was computed at. Moving the location, or any
//! change to the owning module, bumps the counter so every entry goes stale at once. Failed
//! evaluations leave their entry stale, so a retry recomputes. Entries hold their field
//! weakly; those of dropped fields are pruned when the module changes.

use crate::derivative::FieldDerivative;
use crate::error::{AssignmentResult, FieldError, Result};
use crate::field::{Field, FieldId, WeakField};
use crate::location::{Location, MeshLocation, ParameterPerturbation};
use crate::module::FieldModule;
use crate::settings::EvaluationSettings;
use crate::value_cache::{DerivativeValueCache, ValueCache};
use log::{debug, trace};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub type ValueCacheHandle = Rc<RefCell<ValueCache>>;
pub type DerivativeCacheHandle = Rc<RefCell<DerivativeValueCache>>;

pub struct FieldCache {
    module: FieldModule,
    settings: EvaluationSettings,
    location: RefCell<Location>,
    time: Cell<f64>,
    perturbations: RefCell<Vec<ParameterPerturbation>>,
    location_counter: Cell<u64>,
    module_revision: Cell<u64>,
    values: RefCell<HashMap<FieldId, (WeakField, ValueCacheHandle)>>,
    derivatives: RefCell<HashMap<(FieldId, FieldDerivative), (WeakField, DerivativeCacheHandle)>>,
}

impl FieldCache {
    pub fn new(module: &FieldModule) -> Self {
        Self {
            module: module.clone(),
            settings: module.settings(),
            location: RefCell::new(Location::None),
            time: Cell::new(0.0),
            perturbations: RefCell::new(Vec::new()),
            location_counter: Cell::new(1),
            module_revision: Cell::new(module.revision()),
            values: RefCell::new(HashMap::new()),
            derivatives: RefCell::new(HashMap::new()),
        }
    }

    pub fn module(&self) -> &FieldModule {
        &self.module
    }

    pub fn settings(&self) -> &EvaluationSettings {
        &self.settings
    }

    pub fn location(&self) -> Location {
        self.location.borrow().clone()
    }

    pub fn mesh_location(&self) -> Option<MeshLocation> {
        self.location.borrow().mesh_location().cloned()
    }

    pub fn time(&self) -> f64 {
        self.time.get()
    }

    pub fn set_mesh_location(&self, element: usize, xi: &[f64]) {
        self.set_location(Location::Mesh(MeshLocation::new(element, xi)));
    }

    pub fn set_node(&self, node: usize, host: Option<MeshLocation>) {
        self.set_location(Location::Node { node, host });
    }

    pub fn set_location(&self, location: Location) {
        *self.location.borrow_mut() = location;
        self.invalidate();
    }

    pub fn set_time(&self, time: f64) {
        self.time.set(time);
        self.invalidate();
    }

    pub fn clear_location(&self) {
        *self.location.borrow_mut() = Location::None;
        self.perturbations.borrow_mut().clear();
        self.invalidate();
    }

    /// Sum of the perturbations applied to component `index` of parameters field `field`.
    pub(crate) fn parameter_perturbation(&self, field: FieldId, index: usize) -> f64 {
        self.perturbations
            .borrow()
            .iter()
            .filter(|p| p.field == field && p.index == index)
            .map(|p| p.delta)
            .sum()
    }

    pub(crate) fn push_perturbation(&self, perturbation: ParameterPerturbation) {
        self.perturbations.borrow_mut().push(perturbation);
        self.invalidate();
    }

    pub(crate) fn pop_perturbation(&self) {
        self.perturbations.borrow_mut().pop();
        self.invalidate();
    }

    /// Marks every memoized value and derivative as stale.
    pub fn invalidate(&self) {
        self.location_counter.set(self.location_counter.get() + 1);
    }

    /// Detached context at the same location, for perturbed re-evaluation.
    pub(crate) fn create_working_cache(&self) -> FieldCache {
        let working = FieldCache::new(&self.module);
        *working.location.borrow_mut() = self.location();
        working.time.set(self.time());
        *working.perturbations.borrow_mut() = self.perturbations.borrow().clone();
        FieldCache {
            settings: self.settings,
            ..working
        }
    }

    fn current_counter(&self) -> u64 {
        let revision = self.module.revision();
        if revision != self.module_revision.get() {
            self.module_revision.set(revision);
            self.invalidate();
            self.prune();
        }
        self.location_counter.get()
    }

    /// Drops the entries of fields that no longer exist.
    fn prune(&self) {
        let before = self.entry_count();
        self.values.borrow_mut().retain(|_, (field, _)| field.is_alive());
        self.derivatives.borrow_mut().retain(|_, (field, _)| field.is_alive());
        let pruned = before - self.entry_count();
        if pruned > 0 {
            trace!("pruned {pruned} cache entries of dropped fields");
        }
    }

    /// Number of value and derivative entries held.
    pub fn entry_count(&self) -> usize {
        self.values.borrow().len() + self.derivatives.borrow().len()
    }

    fn check_module(&self, field: &Field) -> Result<()> {
        if self.module.owns(field) {
            Ok(())
        } else {
            Err(FieldError::DifferentModule(field.name()))
        }
    }

    /// Value storage for `field`, created on first touch. Does not evaluate.
    pub fn value_cache(&self, field: &Field) -> ValueCacheHandle {
        if let Some((_, entry)) = self.values.borrow().get(&field.id()) {
            return entry.clone();
        }
        let entry = Rc::new(RefCell::new(field.operator().create_value_cache(field)));
        self.values
            .borrow_mut()
            .insert(field.id(), (field.downgrade(), entry.clone()));
        entry
    }

    /// Derivative storage for `field`, created on first touch. Does not evaluate.
    pub fn derivative_value_cache(
        &self,
        field: &Field,
        derivative: &FieldDerivative,
    ) -> DerivativeCacheHandle {
        let key = (field.id(), *derivative);
        if let Some((_, entry)) = self.derivatives.borrow().get(&key) {
            return entry.clone();
        }
        let entry = Rc::new(RefCell::new(DerivativeValueCache::new(
            field.component_count(),
            derivative.term_count(),
        )));
        self.derivatives
            .borrow_mut()
            .insert(key, (field.downgrade(), entry.clone()));
        entry
    }

    /// Computes or fetches the value of `field` at the bound location.
    pub fn evaluate(&self, field: &Field) -> Result<ValueCacheHandle> {
        self.check_module(field)?;
        let counter = self.current_counter();
        let entry = self.value_cache(field);
        if entry.borrow().evaluation_counter == counter {
            trace!("value cache hit for {}", field.name());
            return Ok(entry);
        }
        trace!("evaluating {}", field.name());
        let mut values = entry.borrow_mut();
        values.evaluation_counter = 0;
        match field.operator().evaluate(field, self, &mut values) {
            Ok(()) => {
                values.evaluation_counter = counter;
                drop(values);
                Ok(entry)
            }
            Err(err) => Err(err.in_field(&field.name())),
        }
    }

    /// Computes or fetches one derivative of `field` at the bound location.
    pub fn evaluate_derivative(
        &self,
        field: &Field,
        derivative: &FieldDerivative,
    ) -> Result<DerivativeCacheHandle> {
        self.check_module(field)?;
        let counter = self.current_counter();
        let entry = self.derivative_value_cache(field, derivative);
        if entry.borrow().evaluation_counter == counter {
            trace!("derivative cache hit for {} {}", field.name(), derivative);
            return Ok(entry);
        }
        let mut out = entry.borrow_mut();
        out.evaluation_counter = 0;
        let result = if field.derivative_tree_order(derivative) < derivative.total_order() {
            out.zero_values();
            Ok(())
        } else {
            trace!("evaluating {} of {}", derivative, field.name());
            field
                .operator()
                .evaluate_derivative(field, self, derivative, &mut out)
        };
        match result {
            Ok(()) => {
                out.evaluation_counter = counter;
                drop(out);
                Ok(entry)
            }
            Err(err) => Err(err.in_field(&field.name())),
        }
    }

    /// Evaluates the value and every derivative from order one up to `derivative`.
    pub fn evaluate_derivative_tree(
        &self,
        field: &Field,
        derivative: &FieldDerivative,
    ) -> Result<DerivativeCacheHandle> {
        self.evaluate(field)?;
        let mut chain = vec![*derivative];
        while let Some(lower) = chain.last().and_then(FieldDerivative::lower) {
            chain.push(lower);
        }
        let mut top = None;
        for d in chain.iter().rev() {
            top = Some(self.evaluate_derivative(field, d)?);
        }
        top.ok_or_else(|| FieldError::InvalidArgument("empty derivative tree".into()))
    }

    /// Writes `values` through `field` towards its sources. All memoized results go stale.
    pub fn assign(&self, field: &Field, values: &[f64]) -> AssignmentResult {
        if self.check_module(field).is_err() {
            debug!("cannot assign {}: field from another module", field.name());
            return AssignmentResult::Fail;
        }
        if values.len() != field.component_count() {
            debug!(
                "cannot assign {}: expected {} values, got {}",
                field.name(),
                field.component_count(),
                values.len()
            );
            return AssignmentResult::Fail;
        }
        self.current_counter();
        {
            let entry = self.value_cache(field);
            let mut cache = entry.borrow_mut();
            cache.values.copy_from_slice(values);
            cache.evaluation_counter = 0;
        }
        let result = {
            let _changes = self.module.change_guard();
            field.operator().assign(field, self, values)
        };
        self.invalidate();
        result
    }
}

//! Immutable catalogue of named step sequences. The registry hands out deep
//! clones; nothing outside this module can mutate the built-in catalogue.

use std::collections::HashMap;

use fleetops_types::{OperationType, Plan, Step, StepKind};

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Immutable, clone-on-read collection of plans, seeded with the built-in
/// catalogue and extensible via [`PlanRegistry::register`].
#[derive(Debug, Clone)]
pub struct PlanRegistry {
    plans: HashMap<String, Plan>,
}

impl PlanRegistry {
    /// Builds a registry pre-populated with the built-in plans.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            plans: HashMap::new(),
        };
        for plan in builtin_plans() {
            registry.plans.insert(plan.plan_id.clone(), plan);
        }
        registry
    }

    /// Registers or replaces a plan. A clone is stored; empty plan ids are
    /// ignored.
    pub fn register(&mut self, plan: Plan) {
        if plan.plan_id.is_empty() {
            return;
        }
        self.plans.insert(plan.plan_id.clone(), plan);
    }

    /// Returns a deep clone of the named plan, if registered.
    pub fn get(&self, plan_id: &str) -> Option<Plan> {
        self.plans.get(plan_id).cloned()
    }

    /// Returns deep clones of every registered plan.
    pub fn list(&self) -> Vec<Plan> {
        self.plans.values().cloned().collect()
    }

    /// Returns the plan id used by default for a given operation type.
    pub fn default_plan_id(op_type: OperationType) -> &'static str {
        match op_type {
            OperationType::Reimage => "plan/repave-join",
            OperationType::Reboot => "plan/reboot",
            OperationType::EnterMaintenance => "plan/enter-maintenance",
            OperationType::ExitMaintenance => "plan/exit-maintenance",
        }
    }
}

impl Default for PlanRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn builtin_plans() -> Vec<Plan> {
    vec![
        Plan {
            plan_id: "plan/reboot".into(),
            display_name: "Reboot machine".into(),
            steps: vec![Step::new(
                "reboot",
                StepKind::Reboot { force: false },
                DEFAULT_TIMEOUT_SECONDS,
                2,
            )],
        },
        Plan {
            plan_id: "plan/repave-join".into(),
            display_name: "Repave and join customer cluster".into(),
            steps: vec![
                Step::new(
                    "set-netboot",
                    StepKind::SetNetboot {
                        profile: "repave".into(),
                    },
                    DEFAULT_TIMEOUT_SECONDS,
                    2,
                ),
                Step::new("reboot", StepKind::Reboot { force: true }, DEFAULT_TIMEOUT_SECONDS, 2),
                Step::new(
                    "repave-image",
                    StepKind::RepaveImage {
                        image_ref: String::new(),
                        cloud_init_ref: String::new(),
                    },
                    900,
                    1,
                ),
                Step::new("join-cluster", StepKind::KubeadmJoin, DEFAULT_TIMEOUT_SECONDS, 3),
                Step::new("verify", StepKind::VerifyInCluster, 120, 5),
            ],
        },
        Plan {
            plan_id: "plan/rma".into(),
            display_name: "Decommission for RMA".into(),
            steps: vec![
                Step::new(
                    "drain",
                    StepKind::SshCommand {
                        script_ref: "drain.sh".into(),
                        args: vec![],
                    },
                    DEFAULT_TIMEOUT_SECONDS,
                    2,
                ),
                Step::new("reboot", StepKind::Reboot { force: true }, DEFAULT_TIMEOUT_SECONDS, 1),
                Step::new(
                    "rma-action",
                    StepKind::RmaAction {
                        reason: String::new(),
                    },
                    DEFAULT_TIMEOUT_SECONDS,
                    0,
                ),
            ],
        },
        Plan {
            plan_id: "plan/upgrade".into(),
            display_name: "Upgrade machine firmware/image".into(),
            steps: vec![
                Step::new(
                    "set-netboot",
                    StepKind::SetNetboot {
                        profile: "upgrade".into(),
                    },
                    DEFAULT_TIMEOUT_SECONDS,
                    2,
                ),
                Step::new(
                    "repave-image",
                    StepKind::RepaveImage {
                        image_ref: String::new(),
                        cloud_init_ref: String::new(),
                    },
                    900,
                    1,
                ),
                Step::new("verify", StepKind::VerifyInCluster, 120, 5),
            ],
        },
        Plan {
            plan_id: "plan/net-reconfig".into(),
            display_name: "Reconfigure networking".into(),
            steps: vec![Step::new(
                "net-reconfig",
                StepKind::NetReconfig {
                    params: HashMap::new(),
                },
                60,
                1,
            )],
        },
        Plan {
            plan_id: "plan/enter-maintenance".into(),
            display_name: "Enter maintenance (phase transition only)".into(),
            steps: vec![],
        },
        Plan {
            plan_id: "plan/exit-maintenance".into(),
            display_name: "Exit maintenance (phase transition only)".into(),
            steps: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plans_cover_every_operation_type() {
        let registry = PlanRegistry::with_builtins();
        for op_type in [
            OperationType::Reboot,
            OperationType::Reimage,
            OperationType::EnterMaintenance,
            OperationType::ExitMaintenance,
        ] {
            let id = PlanRegistry::default_plan_id(op_type);
            assert!(registry.get(id).is_some(), "missing plan for {op_type}");
        }
    }

    #[test]
    fn get_returns_independent_clones() {
        let registry = PlanRegistry::with_builtins();
        let mut plan = registry.get("plan/reboot").unwrap();
        plan.steps.clear();
        let fresh = registry.get("plan/reboot").unwrap();
        assert_eq!(fresh.steps.len(), 1);
    }

    #[test]
    fn register_ignores_empty_plan_id() {
        let mut registry = PlanRegistry::with_builtins();
        let before = registry.list().len();
        registry.register(Plan {
            plan_id: String::new(),
            display_name: "noop".into(),
            steps: vec![],
        });
        assert_eq!(registry.list().len(), before);
    }

    #[test]
    fn register_replaces_existing_plan() {
        let mut registry = PlanRegistry::with_builtins();
        registry.register(Plan {
            plan_id: "plan/reboot".into(),
            display_name: "Custom reboot".into(),
            steps: vec![],
        });
        let plan = registry.get("plan/reboot").unwrap();
        assert_eq!(plan.display_name, "Custom reboot");
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn maintenance_transitions_use_empty_step_plans() {
        let registry = PlanRegistry::with_builtins();
        assert!(registry.get("plan/enter-maintenance").unwrap().steps.is_empty());
        assert!(registry.get("plan/exit-maintenance").unwrap().steps.is_empty());
    }
}

use std::rc::Rc;

use whirl_common::SharedOpaqueSlot;
use whirl_utils::PackageId;

use crate::PackageAssembler;

/// Drives definition resolution across every package loaded for a
/// compilation. Cycles through each package's queue until no pass is
/// productive; cycles between definitions are broken by giving each queued
/// type definition a turn as the shared opaque-slot candidate.
pub struct Resolver {
    assemblers: Vec<PackageAssembler>,
    slot:       SharedOpaqueSlot,
}

impl Resolver {
    pub fn new(slot: SharedOpaqueSlot) -> Self {
        Self {
            assemblers: Vec::new(),
            slot,
        }
    }

    pub fn add_package(
        &mut self,
        assembler: PackageAssembler,
    ) {
        self.assemblers.push(assembler);
    }

    fn outstanding(&self) -> usize {
        self.assemblers
            .iter()
            .map(|pa| pa.queue_len() + pa.total_unknowns() + pa.pending_import_count())
            .sum()
    }

    /// Runs resolution to its fixed point, then finalizes: remaining queue
    /// entries become undefined-symbol errors and every walker leaves
    /// resolution mode. Returns whether everything resolved.
    pub fn resolve(&mut self) -> bool {
        loop {
            let before = self.outstanding();
            let mut progressed = false;

            for pa in &mut self.assemblers {
                progressed |= pa.retry_pending_imports();
            }

            // every queued type definition takes a turn as the prototype
            // candidate; while its prototype is out, every queue in every
            // package re-walks to a local fixed point so cycle partners can
            // bind through the slot
            let candidates: Vec<(PackageId, Rc<str>)> = self
                .assemblers
                .iter()
                .flat_map(|pa| {
                    let id = pa.package().id();
                    pa.type_candidates().into_iter().map(move |name| (id, name))
                })
                .collect();

            if candidates.is_empty() {
                for pa in &mut self.assemblers {
                    progressed |= pa.walk_queue_once();
                }
            }
            for (pkg_id, name) in candidates {
                // a definition that landed earlier in this pass is no longer
                // a candidate
                let already_defined = self
                    .assemblers
                    .iter()
                    .any(|pa| pa.package().id() == pkg_id && pa.package().global_lookup(&name).is_some());
                if already_defined {
                    continue;
                }

                tracing::trace!(%pkg_id, %name, "prototype candidate installed");
                self.slot.install(name, pkg_id);
                loop {
                    let mut swept = false;
                    for pa in &mut self.assemblers {
                        swept |= pa.walk_queue_once();
                    }
                    progressed |= swept;
                    if !swept {
                        break;
                    }
                }
                // the candidate's own walk clears the slot at swap-in; this
                // covers the turns where it never completed
                self.slot.clear();
            }

            // a pass is productive when it shrank the outstanding work
            if !progressed && self.outstanding() >= before {
                break;
            }
        }

        let resolved = self.outstanding() == 0;
        tracing::debug!(resolved, remaining = self.outstanding(), "resolution fixed point reached");

        for pa in &mut self.assemblers {
            pa.log_unresolved();
        }
        for pa in &mut self.assemblers {
            pa.resolution_done();
        }
        resolved
    }
}

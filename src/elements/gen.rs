use std::collections::HashMap;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{check_bus, check_id, check_init_len, solver_bus, Element, InjectionRes};
use crate::error::{Error, Result};

/// A voltage-controlled generator. Injects its active power setpoint and
/// holds the voltage magnitude at its bus, which makes that bus PV unless it
/// is the slack. Reactive output is recovered after the solve and clamped to
/// `[min_q_mvar, max_q_mvar]` for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gen {
    pub bus: usize,
    pub p_mw: f64,
    pub vm_pu: f64,
    pub min_q_mvar: f64,
    pub max_q_mvar: f64,
    pub status: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Gens {
    gen: Vec<Gen>,
    res: Vec<InjectionRes>,
    q_at_limit: Vec<bool>,
}

impl Gens {
    pub(crate) fn init(
        &mut self,
        p_mw: &[f64],
        vm_pu: &[f64],
        min_q_mvar: &[f64],
        max_q_mvar: &[f64],
        bus: &[usize],
    ) -> Result<()> {
        check_init_len(p_mw.len(), vm_pu.len())?;
        check_init_len(p_mw.len(), min_q_mvar.len())?;
        check_init_len(p_mw.len(), max_q_mvar.len())?;
        check_init_len(p_mw.len(), bus.len())?;
        self.gen = (0..p_mw.len())
            .map(|i| Gen {
                bus: bus[i],
                p_mw: p_mw[i],
                vm_pu: vm_pu[i],
                min_q_mvar: min_q_mvar[i],
                max_q_mvar: max_q_mvar[i],
                status: true,
            })
            .collect();
        self.reset_results();
        Ok(())
    }

    pub fn nb(&self) -> usize {
        self.gen.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.gen.len(), "generator", id)?;
        self.gen[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.gen.len(), "generator", id)?;
        self.gen[id].status = true;
        Ok(())
    }

    pub(crate) fn change_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.gen.len(), "generator", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.gen[id].bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_p(&mut self, id: usize, p_mw: f64) -> Result<()> {
        check_id(self.gen.len(), "generator", id)?;
        self.gen[id].p_mw = p_mw;
        Ok(())
    }

    pub(crate) fn change_v(&mut self, id: usize, vm_pu: f64) -> Result<()> {
        check_id(self.gen.len(), "generator", id)?;
        self.gen[id].vm_pu = vm_pu;
        Ok(())
    }

    pub fn bus(&self, id: usize) -> Result<usize> {
        check_id(self.gen.len(), "generator", id)?;
        Ok(self.gen[id].bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.gen.iter().map(|g| g.status).collect()
    }

    pub fn res(&self) -> &[InjectionRes] {
        &self.res
    }

    /// True for generators whose reported Q was clipped at a limit.
    pub fn q_at_limit(&self) -> &[bool] {
        &self.q_at_limit
    }

    /// External bus id of the designated slack generator, validating the
    /// assignment before any iteration starts.
    pub(crate) fn slack_bus_id(&self, slack_gen: Option<usize>) -> Result<usize> {
        let id = slack_gen
            .ok_or_else(|| Error::SlackInvalid("no slack generator assigned".to_string()))?;
        let gen = self
            .gen
            .get(id)
            .ok_or_else(|| Error::SlackInvalid(format!("generator id {} is out of range", id)))?;
        if !gen.status {
            return Err(Error::SlackInvalid(format!(
                "generator {} is deactivated",
                id
            )));
        }
        Ok(gen.bus)
    }

    /// Rescale the voltage magnitude at every active generator bus to the
    /// generator setpoint, keeping the angle of the current iterate.
    pub(crate) fn set_vm(&self, v: &mut [Complex64], bus_map: &BusIndexMap) -> Result<()> {
        for (i, gen) in self.gen.iter().enumerate() {
            if !gen.status {
                continue;
            }
            let b = solver_bus(bus_map, "generator", i, gen.bus)?;
            let mag = v[b].norm();
            v[b] = if mag == 0.0 {
                Complex64::new(gen.vm_pu, 0.0)
            } else {
                v[b] * (gen.vm_pu / mag)
            };
        }
        Ok(())
    }

    pub(crate) fn reset_results(&mut self) {
        self.res = vec![InjectionRes::default(); self.gen.len()];
        self.q_at_limit = vec![false; self.gen.len()];
    }

    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        _sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, gen) in self.gen.iter().enumerate() {
            if !gen.status {
                continue;
            }
            let b = solver_bus(bus_map, "generator", i, gen.bus)?;
            self.res[i] = InjectionRes {
                p_mw: gen.p_mw,
                q_mvar: 0.0,
                v_kv: v[b].norm() * bus_vn_kv[gen.bus],
            };
        }
        Ok(())
    }

    /// Assign the active-power residual of the slack bus to the slack
    /// generator. Injections of other units at the same bus are already
    /// netted out of `p_slack_mw` by the caller, except co-located
    /// generators which are handled here.
    pub(crate) fn set_p_slack(&mut self, slack_gen: usize, p_slack_mw: f64) {
        let slack_bus = self.gen[slack_gen].bus;
        let other: f64 = self
            .gen
            .iter()
            .enumerate()
            .filter(|(i, g)| *i != slack_gen && g.status && g.bus == slack_bus)
            .map(|(_, g)| g.p_mw)
            .sum();
        self.res[slack_gen].p_mw = p_slack_mw - other;
    }

    /// Distribute the reactive power each bus needs onto its generators.
    ///
    /// `q_by_bus` holds, per external bus, the reactive power drawn by every
    /// non-generator element (MVAr). With a single generator the whole
    /// residual lands on it; with several, it is split in proportion to each
    /// generator's reactive range, the equal-range case degenerating to an
    /// equal share. The reported value is clamped to the unit limits and the
    /// clamp is flagged.
    pub(crate) fn set_q(&mut self, q_by_bus: &[f64]) {
        let mut cg: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, gen) in self.gen.iter().enumerate() {
            if gen.status {
                cg.entry(gen.bus).or_default().push(i);
            }
        }

        for (bus, ids) in &cg {
            let total = q_by_bus[*bus];
            let n = ids.len() as f64;
            let q_min: f64 = ids.iter().map(|&i| self.gen[i].min_q_mvar).sum();
            let q_max: f64 = ids.iter().map(|&i| self.gen[i].max_q_mvar).sum();
            let range = q_max - q_min;

            for &i in ids {
                let gen = &self.gen[i];
                let share = if ids.len() == 1 {
                    total
                } else if range.is_finite() && range.abs() > 1e-13 {
                    gen.min_q_mvar + (total - q_min) / range * (gen.max_q_mvar - gen.min_q_mvar)
                } else if range.is_finite() {
                    // zero aggregate range: spread the mismatch evenly
                    gen.min_q_mvar + (total - q_min) / n
                } else {
                    total / n
                };

                let clipped = if gen.min_q_mvar <= gen.max_q_mvar {
                    share.clamp(gen.min_q_mvar, gen.max_q_mvar)
                } else {
                    share
                };
                self.res[i].q_mvar = clipped;
                self.q_at_limit[i] = clipped != share;
            }
        }
    }

    /// Aggregate reactive limits (MVAr) of the active generators, per
    /// solver bus. `None` for buses without any active generator.
    pub(crate) fn q_bounds_by_bus(
        &self,
        bus_map: &BusIndexMap,
    ) -> Result<Vec<Option<(f64, f64)>>> {
        let mut bounds = vec![None; bus_map.n_solver()];
        for (i, gen) in self.gen.iter().enumerate() {
            if !gen.status {
                continue;
            }
            let b = solver_bus(bus_map, "generator", i, gen.bus)?;
            let entry = bounds[b].get_or_insert((0.0, 0.0));
            entry.0 += gen.min_q_mvar;
            entry.1 += gen.max_q_mvar;
        }
        Ok(bounds)
    }

    pub(crate) fn state(&self) -> Vec<Gen> {
        self.gen.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Gen>) {
        self.gen = state;
        self.reset_results();
    }
}

impl Element for Gens {
    fn fill_sbus(
        &self,
        s_bus: &mut [Complex64],
        _ac: bool,
        bus_map: &BusIndexMap,
        sn_mva: f64,
    ) -> Result<()> {
        for (i, gen) in self.gen.iter().enumerate() {
            if !gen.status {
                continue;
            }
            let b = solver_bus(bus_map, "generator", i, gen.bus)?;
            s_bus[b] += Complex64::new(gen.p_mw / sn_mva, 0.0);
        }
        Ok(())
    }

    fn fill_pv(
        &self,
        pv: &mut Vec<usize>,
        added: &mut [bool],
        slack_bus_solver: usize,
        bus_map: &BusIndexMap,
    ) -> Result<()> {
        for (i, gen) in self.gen.iter().enumerate() {
            if !gen.status {
                continue;
            }
            let b = solver_bus(bus_map, "generator", i, gen.bus)?;
            if b == slack_bus_solver || added[b] {
                continue;
            }
            added[b] = true;
            pv.push(b);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gens_at(buses: &[usize], q_limits: &[(f64, f64)]) -> Gens {
        let n = buses.len();
        let mut gens = Gens::default();
        gens.init(
            &vec![10.0; n],
            &vec![1.02; n],
            &q_limits.iter().map(|l| l.0).collect::<Vec<_>>(),
            &q_limits.iter().map(|l| l.1).collect::<Vec<_>>(),
            buses,
        )
        .unwrap();
        gens
    }

    #[test]
    fn single_generator_takes_the_full_residual() {
        let mut gens = gens_at(&[0], &[(-30.0, 30.0)]);
        gens.reset_results();
        gens.set_q(&[12.5]);
        assert_eq!(gens.res()[0].q_mvar, 12.5);
        assert!(!gens.q_at_limit()[0]);
    }

    #[test]
    fn residual_beyond_the_limit_is_clipped_and_flagged() {
        let mut gens = gens_at(&[0], &[(-10.0, 10.0)]);
        gens.reset_results();
        gens.set_q(&[22.0]);
        assert_eq!(gens.res()[0].q_mvar, 10.0);
        assert!(gens.q_at_limit()[0]);
    }

    #[test]
    fn co_located_generators_split_by_reactive_range() {
        let mut gens = gens_at(&[0, 0], &[(-10.0, 10.0), (-30.0, 30.0)]);
        gens.reset_results();
        gens.set_q(&[20.0]);
        let q0 = gens.res()[0].q_mvar;
        let q1 = gens.res()[1].q_mvar;
        assert!((q0 + q1 - 20.0).abs() < 1e-12);
        assert!((q0 - 5.0).abs() < 1e-12);
        assert!((q1 - 15.0).abs() < 1e-12);
    }

    #[test]
    fn equal_ranges_share_equally() {
        let mut gens = gens_at(&[0, 0], &[(-20.0, 20.0), (-20.0, 20.0)]);
        gens.reset_results();
        gens.set_q(&[16.0]);
        assert!((gens.res()[0].q_mvar - 8.0).abs() < 1e-12);
        assert!((gens.res()[1].q_mvar - 8.0).abs() < 1e-12);
    }

    #[test]
    fn slack_validation_catches_bad_assignments() {
        let mut gens = gens_at(&[0], &[(-10.0, 10.0)]);
        assert!(matches!(
            gens.slack_bus_id(None),
            Err(Error::SlackInvalid(_))
        ));
        assert!(matches!(
            gens.slack_bus_id(Some(3)),
            Err(Error::SlackInvalid(_))
        ));
        gens.deactivate(0).unwrap();
        assert!(matches!(
            gens.slack_bus_id(Some(0)),
            Err(Error::SlackInvalid(_))
        ));
        gens.reactivate(0).unwrap();
        assert_eq!(gens.slack_bus_id(Some(0)), Ok(0));
    }
}

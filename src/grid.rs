use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use sparsetools::coo::Coo;
use sparsetools::csc::CSC;
use sparsetools::csr::CSR;

use crate::bus::BusIndexMap;
use crate::elements::{
    BranchRes, Element, Gen, Gens, InjectionRes, Line, Lines, Load, Loads, SGen, SGens, Shunt,
    Shunts, Storage, Storages, Trafo, Trafos,
};
use crate::error::{Error, Result};
use crate::solver::{Solver, SolverType};

/// Snapshot of everything needed to rebuild a [`GridModel`]: the per-unit
/// configuration, the bus table and each element collection's own state.
/// Solver iterates and results are deliberately not part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridState {
    pub version: String,
    pub init_vm_pu: f64,
    pub sn_mva: f64,
    pub bus_vn_kv: Vec<f64>,
    pub bus_status: Vec<bool>,
    pub lines: Vec<Line>,
    pub shunts: Vec<Shunt>,
    pub trafos: Vec<Trafo>,
    pub gens: Vec<Gen>,
    pub loads: Vec<Load>,
    pub sgens: Vec<SGen>,
    pub storages: Vec<Storage>,
    pub slack_gen: Option<usize>,
}

/// Per-family positions in the environment topology vector and the
/// substation each element belongs to.
#[derive(Debug, Clone, Default)]
struct TopoTables {
    load_pos: Vec<usize>,
    gen_pos: Vec<usize>,
    line_or_pos: Vec<usize>,
    line_ex_pos: Vec<usize>,
    trafo_hv_pos: Vec<usize>,
    trafo_lv_pos: Vec<usize>,
    storage_pos: Vec<usize>,
    load_subid: Vec<usize>,
    gen_subid: Vec<usize>,
    line_or_subid: Vec<usize>,
    line_ex_subid: Vec<usize>,
    trafo_hv_subid: Vec<usize>,
    trafo_lv_subid: Vec<usize>,
    storage_subid: Vec<usize>,
}

/// Everything the solver consumes, assembled from the element collections.
struct Assembled {
    bus_map: BusIndexMap,
    slack_bus: usize,
    slack_bus_solver: usize,
    y_bus: CSR<usize, Complex64>,
    s_bus: Vec<Complex64>,
    pv: Vec<usize>,
    pq: Vec<usize>,
}

/// The grid model: owns the element collections, assembles the nodal
/// equations and drives the selected solver.
///
/// The lifecycle per solve is `reset -> assemble -> solve -> project`. Any
/// mutation between solves flips the dirty flag; the admittance matrix, the
/// injection vector and the bus classification are rebuilt from scratch on
/// every solve.
pub struct GridModel {
    need_reset: bool,
    compute_results_flag: bool,
    init_vm_pu: f64,
    sn_mva: f64,

    bus_vn_kv: Vec<f64>,
    bus_status: Vec<bool>,
    bus_map: BusIndexMap,

    lines: Lines,
    shunts: Shunts,
    trafos: Trafos,
    gens: Gens,
    loads: Loads,
    sgens: SGens,
    storages: Storages,

    slack_gen: Option<usize>,
    slack_bus: usize,
    slack_bus_solver: usize,

    y_bus: Option<CSR<usize, Complex64>>,
    s_bus: Vec<Complex64>,
    bus_pv: Vec<usize>,
    bus_pq: Vec<usize>,

    solver: Solver,

    n_sub: usize,
    topo: TopoTables,
}

impl Default for GridModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GridModel {
    pub fn new() -> Self {
        Self {
            need_reset: true,
            compute_results_flag: true,
            init_vm_pu: 1.04,
            sn_mva: 1.0,
            bus_vn_kv: Vec::new(),
            bus_status: Vec::new(),
            bus_map: BusIndexMap::default(),
            lines: Lines::default(),
            shunts: Shunts::default(),
            trafos: Trafos::default(),
            gens: Gens::default(),
            loads: Loads::default(),
            sgens: SGens::default(),
            storages: Storages::default(),
            slack_gen: None,
            slack_bus: 0,
            slack_bus_solver: 0,
            y_bus: None,
            s_bus: Vec::new(),
            bus_pv: Vec::new(),
            bus_pq: Vec::new(),
            solver: Solver::default(),
            n_sub: 0,
            topo: TopoTables::default(),
        }
    }

    // ---- initialization -------------------------------------------------

    pub fn init_bus(&mut self, bus_vn_kv: &[f64]) {
        self.bus_vn_kv = bus_vn_kv.to_vec();
        self.bus_status = vec![true; bus_vn_kv.len()];
        self.need_reset = true;
    }

    pub fn init_powerlines(
        &mut self,
        r: &[f64],
        x: &[f64],
        h: &[Complex64],
        from_bus: &[usize],
        to_bus: &[usize],
    ) -> Result<()> {
        self.lines.init(r, x, h, from_bus, to_bus)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn init_shunts(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        self.shunts.init(p_mw, q_mvar, bus)?;
        self.need_reset = true;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init_trafos(
        &mut self,
        r: &[f64],
        x: &[f64],
        b: &[Complex64],
        tap_step_pct: &[f64],
        tap_pos: &[f64],
        shift_deg: &[f64],
        tap_hv: &[bool],
        hv_bus: &[usize],
        lv_bus: &[usize],
    ) -> Result<()> {
        self.trafos.init(
            r,
            x,
            b,
            tap_step_pct,
            tap_pos,
            shift_deg,
            tap_hv,
            hv_bus,
            lv_bus,
        )?;
        self.need_reset = true;
        Ok(())
    }

    pub fn init_generators(
        &mut self,
        p_mw: &[f64],
        vm_pu: &[f64],
        min_q_mvar: &[f64],
        max_q_mvar: &[f64],
        bus: &[usize],
    ) -> Result<()> {
        self.gens.init(p_mw, vm_pu, min_q_mvar, max_q_mvar, bus)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn init_loads(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        self.loads.init(p_mw, q_mvar, bus)?;
        self.need_reset = true;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn init_sgens(
        &mut self,
        p_mw: &[f64],
        q_mvar: &[f64],
        min_p_mw: &[f64],
        max_p_mw: &[f64],
        min_q_mvar: &[f64],
        max_q_mvar: &[f64],
        bus: &[usize],
    ) -> Result<()> {
        self.sgens
            .init(p_mw, q_mvar, min_p_mw, max_p_mw, min_q_mvar, max_q_mvar, bus)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn init_storages(&mut self, p_mw: &[f64], q_mvar: &[f64], bus: &[usize]) -> Result<()> {
        self.storages.init(p_mw, q_mvar, bus)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn add_slack_gen(&mut self, gen_id: usize) -> Result<()> {
        if gen_id >= self.gens.nb() {
            return Err(Error::SlackInvalid(format!(
                "generator id {} is out of range",
                gen_id
            )));
        }
        self.slack_gen = Some(gen_id);
        self.need_reset = true;
        Ok(())
    }

    pub fn set_sn_mva(&mut self, sn_mva: f64) {
        self.sn_mva = sn_mva;
        self.need_reset = true;
    }

    pub fn get_sn_mva(&self) -> f64 {
        self.sn_mva
    }

    pub fn set_init_vm_pu(&mut self, init_vm_pu: f64) {
        self.init_vm_pu = init_vm_pu;
    }

    pub fn get_init_vm_pu(&self) -> f64 {
        self.init_vm_pu
    }

    pub fn deactivate_result_computation(&mut self) {
        self.compute_results_flag = false;
    }

    pub fn reactivate_result_computation(&mut self) {
        self.compute_results_flag = true;
    }

    // ---- solver control -------------------------------------------------

    pub fn change_solver(&mut self, kind: SolverType) {
        self.need_reset = true;
        self.solver.change_type(kind);
    }

    pub fn get_solver_type(&self) -> SolverType {
        self.solver.get_type()
    }

    pub fn available_solvers(&self) -> Vec<SolverType> {
        Solver::available_solvers()
    }

    // ---- bus mutations --------------------------------------------------

    pub fn deactivate_bus(&mut self, bus_id: usize) -> Result<()> {
        if bus_id >= self.bus_status.len() {
            return Err(Error::InvalidId {
                element: "bus",
                id: bus_id,
            });
        }
        self.bus_status[bus_id] = false;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_bus(&mut self, bus_id: usize) -> Result<()> {
        if bus_id >= self.bus_status.len() {
            return Err(Error::InvalidId {
                element: "bus",
                id: bus_id,
            });
        }
        self.bus_status[bus_id] = true;
        self.need_reset = true;
        Ok(())
    }

    /// Number of connected buses.
    pub fn nb_bus(&self) -> usize {
        self.bus_status.iter().filter(|&&s| s).count()
    }

    pub fn nb_bus_total(&self) -> usize {
        self.bus_status.len()
    }

    pub fn nb_powerline(&self) -> usize {
        self.lines.nb()
    }

    pub fn nb_trafo(&self) -> usize {
        self.trafos.nb()
    }

    pub fn nb_shunt(&self) -> usize {
        self.shunts.nb()
    }

    pub fn nb_gen(&self) -> usize {
        self.gens.nb()
    }

    pub fn nb_load(&self) -> usize {
        self.loads.nb()
    }

    pub fn nb_sgen(&self) -> usize {
        self.sgens.nb()
    }

    pub fn nb_storage(&self) -> usize {
        self.storages.nb()
    }

    // ---- powerline mutations --------------------------------------------

    pub fn deactivate_powerline(&mut self, id: usize) -> Result<()> {
        self.lines.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_powerline(&mut self, id: usize) -> Result<()> {
        self.lines.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_powerline_or(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.lines
            .change_from_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_powerline_ex(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.lines.change_to_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_powerline_or(&self, id: usize) -> Result<usize> {
        self.lines.from_bus(id)
    }

    pub fn get_bus_powerline_ex(&self, id: usize) -> Result<usize> {
        self.lines.to_bus(id)
    }

    // ---- trafo mutations ------------------------------------------------

    pub fn deactivate_trafo(&mut self, id: usize) -> Result<()> {
        self.trafos.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_trafo(&mut self, id: usize) -> Result<()> {
        self.trafos.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_trafo_hv(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.trafos.change_hv_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_trafo_lv(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.trafos.change_lv_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_trafo_hv(&self, id: usize) -> Result<usize> {
        self.trafos.hv_bus(id)
    }

    pub fn get_bus_trafo_lv(&self, id: usize) -> Result<usize> {
        self.trafos.lv_bus(id)
    }

    // ---- load mutations -------------------------------------------------

    pub fn deactivate_load(&mut self, id: usize) -> Result<()> {
        self.loads.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_load(&mut self, id: usize) -> Result<()> {
        self.loads.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_load(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.loads.change_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_p_load(&mut self, id: usize, p_mw: f64) -> Result<()> {
        self.loads.change_p(id, p_mw)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_q_load(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        self.loads.change_q(id, q_mvar)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_load(&self, id: usize) -> Result<usize> {
        self.loads.bus(id)
    }

    // ---- generator mutations --------------------------------------------

    pub fn deactivate_gen(&mut self, id: usize) -> Result<()> {
        self.gens.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_gen(&mut self, id: usize) -> Result<()> {
        self.gens.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_gen(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.gens.change_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_p_gen(&mut self, id: usize, p_mw: f64) -> Result<()> {
        self.gens.change_p(id, p_mw)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_v_gen(&mut self, id: usize, vm_pu: f64) -> Result<()> {
        self.gens.change_v(id, vm_pu)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_gen(&self, id: usize) -> Result<usize> {
        self.gens.bus(id)
    }

    // ---- shunt mutations ------------------------------------------------

    pub fn deactivate_shunt(&mut self, id: usize) -> Result<()> {
        self.shunts.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_shunt(&mut self, id: usize) -> Result<()> {
        self.shunts.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_shunt(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.shunts.change_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_p_shunt(&mut self, id: usize, p_mw: f64) -> Result<()> {
        self.shunts.change_p(id, p_mw)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_q_shunt(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        self.shunts.change_q(id, q_mvar)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_shunt(&self, id: usize) -> Result<usize> {
        self.shunts.bus(id)
    }

    // ---- static generator mutations --------------------------------------

    pub fn deactivate_sgen(&mut self, id: usize) -> Result<()> {
        self.sgens.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_sgen(&mut self, id: usize) -> Result<()> {
        self.sgens.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_sgen(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.sgens.change_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_p_sgen(&mut self, id: usize, p_mw: f64) -> Result<()> {
        self.sgens.change_p(id, p_mw)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_q_sgen(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        self.sgens.change_q(id, q_mvar)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_sgen(&self, id: usize) -> Result<usize> {
        self.sgens.bus(id)
    }

    // ---- storage mutations ----------------------------------------------

    pub fn deactivate_storage(&mut self, id: usize) -> Result<()> {
        self.storages.deactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn reactivate_storage(&mut self, id: usize) -> Result<()> {
        self.storages.reactivate(id)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_bus_storage(&mut self, id: usize, new_bus: usize) -> Result<()> {
        self.storages.change_bus(id, new_bus, self.bus_vn_kv.len())?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_p_storage(&mut self, id: usize, p_mw: f64) -> Result<()> {
        self.storages.change_p(id, p_mw)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn change_q_storage(&mut self, id: usize, q_mvar: f64) -> Result<()> {
        self.storages.change_q(id, q_mvar)?;
        self.need_reset = true;
        Ok(())
    }

    pub fn get_bus_storage(&self, id: usize) -> Result<usize> {
        self.storages.bus(id)
    }

    // ---- assembly and solving -------------------------------------------

    fn element_views(&self) -> [&dyn Element; 7] {
        [
            &self.lines,
            &self.shunts,
            &self.trafos,
            &self.loads,
            &self.gens,
            &self.sgens,
            &self.storages,
        ]
    }

    /// Clear all derived state. Idempotent.
    pub fn reset(&mut self) {
        self.y_bus = None;
        self.s_bus = Vec::new();
        self.bus_map = BusIndexMap::default();
        self.slack_bus = 0;
        self.slack_bus_solver = 0;
        self.bus_pv = Vec::new();
        self.bus_pq = Vec::new();
        self.need_reset = true;
        self.solver.reset();
    }

    fn assemble(&self, ac: bool) -> Result<Assembled> {
        let slack_bus = self.gens.slack_bus_id(self.slack_gen)?;
        let bus_map = BusIndexMap::build(&self.bus_status);
        let slack_bus_solver = bus_map.solver_id(slack_bus).ok_or(Error::SlackDisconnected)?;
        let n = bus_map.n_solver();

        let mut triplets =
            Vec::with_capacity(n + 4 * (self.lines.nb() + self.trafos.nb()) + self.shunts.nb());
        for el in self.element_views() {
            el.fill_ybus(&mut triplets, ac, &bus_map, self.sn_mva)?;
        }
        let mut coo = Coo::<usize, Complex64>::with_size(n, n);
        for (row, col, value) in triplets {
            coo.push(row, col, value);
        }
        let y_bus = coo.to_csr(); // duplicate coordinates sum

        let mut s_bus = vec![Complex64::default(); n];
        for el in self.element_views() {
            el.fill_sbus(&mut s_bus, ac, &bus_map, self.sn_mva)?;
        }
        // balance the initial estimate: the residual active power lands on
        // the slack bus, iteration refines it
        let sum_active: f64 = s_bus.iter().map(|s| s.re).sum();
        s_bus[slack_bus_solver] -= Complex64::new(sum_active, 0.0);

        let mut pv = Vec::new();
        let mut added = vec![false; n];
        for el in self.element_views() {
            el.fill_pv(&mut pv, &mut added, slack_bus_solver, &bus_map)?;
        }
        let mut pq = Vec::with_capacity(n);
        for b in 0..n {
            if b == slack_bus_solver || added[b] {
                continue;
            }
            pq.push(b);
        }

        Ok(Assembled {
            bus_map,
            slack_bus,
            slack_bus_solver,
            y_bus,
            s_bus,
            pv,
            pq,
        })
    }

    /// Rebuild every solver input and map the initial voltage guess into
    /// solver ids, with generator setpoint magnitudes overlaid.
    fn pre_process_solver(&mut self, v_init: &[Complex64], ac: bool) -> Result<Vec<Complex64>> {
        self.reset();
        let asm = self.assemble(ac)?;

        let n = asm.bus_map.n_solver();
        let mut v = vec![Complex64::new(self.init_vm_pu, 0.0); n];
        for solver_id in 0..n {
            v[solver_id] = v_init[asm.bus_map.ext_id(solver_id)];
        }
        self.gens.set_vm(&mut v, &asm.bus_map)?;

        self.slack_bus = asm.slack_bus;
        self.slack_bus_solver = asm.slack_bus_solver;
        self.bus_map = asm.bus_map;
        self.y_bus = Some(asm.y_bus);
        self.s_bus = asm.s_bus;
        self.bus_pv = asm.pv;
        self.bus_pq = asm.pq;
        Ok(v)
    }

    /// Run the AC power flow from the external-sized initial voltage vector.
    ///
    /// Returns the complex voltage per external bus (zero on disconnected
    /// buses) on convergence, or an empty vector if the iteration diverged;
    /// the failure kind is then available from [`GridModel::solver_error`].
    pub fn ac_pf(
        &mut self,
        v_init: &[Complex64],
        max_iter: usize,
        tol: f64,
    ) -> Result<Vec<Complex64>> {
        if v_init.len() != self.bus_vn_kv.len() {
            log::error!(
                "ac_pf: v_init has length {}, expected {}",
                v_init.len(),
                self.bus_vn_kv.len()
            );
            return Err(Error::InputSizeMismatch {
                expected: self.bus_vn_kv.len(),
                got: v_init.len(),
            });
        }
        log::info!("ac power flow, {} connected buses", self.nb_bus());

        let v0 = self.pre_process_solver(v_init, true)?;
        let converged = match &self.y_bus {
            Some(y_bus) => self.solver.compute_pf(
                y_bus,
                &v0,
                &self.s_bus,
                &self.bus_pv,
                &self.bus_pq,
                self.slack_bus_solver,
                max_iter,
                tol,
            )?,
            None => false,
        };
        self.process_results(converged)
    }

    /// Run the linearized DC power flow. Same conventions as
    /// [`GridModel::ac_pf`]; magnitudes come back as 1 pu except on
    /// generator-controlled buses (setpoint) and disconnected buses (zero).
    pub fn dc_pf(
        &mut self,
        v_init: &[Complex64],
        max_iter: usize,
        tol: f64,
    ) -> Result<Vec<Complex64>> {
        if v_init.len() != self.bus_vn_kv.len() {
            log::error!(
                "dc_pf: v_init has length {}, expected {}",
                v_init.len(),
                self.bus_vn_kv.len()
            );
            return Err(Error::InputSizeMismatch {
                expected: self.bus_vn_kv.len(),
                got: v_init.len(),
            });
        }
        log::info!("dc power flow, {} connected buses", self.nb_bus());

        let previous = self.solver.get_type();
        self.solver.change_type(SolverType::Dc);
        let result = self.run_dc(v_init, max_iter, tol);
        self.solver.change_type(previous);
        result
    }

    fn run_dc(&mut self, v_init: &[Complex64], max_iter: usize, tol: f64) -> Result<Vec<Complex64>> {
        let v0 = self.pre_process_solver(v_init, false)?;
        let converged = match &self.y_bus {
            Some(y_bus) => self.solver.compute_pf(
                y_bus,
                &v0,
                &self.s_bus,
                &self.bus_pv,
                &self.bus_pq,
                self.slack_bus_solver,
                max_iter,
                tol,
            )?,
            None => false,
        };
        if converged {
            // PV and slack buses report the generator setpoint magnitude
            self.gens.set_vm(&mut self.solver.state.v, &self.bus_map)?;
            self.solver.refresh_polar();
        }
        self.process_results(converged)
    }

    fn process_results(&mut self, converged: bool) -> Result<Vec<Complex64>> {
        if converged {
            if self.compute_results_flag {
                self.compute_all_results()?;
            }
            self.need_reset = false;
            Ok(expand_to_ext(
                &self.bus_map,
                self.bus_vn_kv.len(),
                self.solver.get_v(),
            ))
        } else {
            // divergence sentinel: clear everything, force reassembly
            self.reset_results();
            self.need_reset = true;
            Ok(Vec::new())
        }
    }

    fn compute_all_results(&mut self) -> Result<()> {
        let sn_mva = self.sn_mva;
        let v = self.solver.get_v().to_vec();

        self.lines
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.trafos
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.loads
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.shunts
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.sgens
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.storages
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;
        self.gens
            .compute_results(&v, &self.bus_map, &self.bus_vn_kv, sn_mva)?;

        // the slack generator absorbs the active power residual of its bus
        let p_slack = self.lines.p_at_bus(self.slack_bus)
            + self.trafos.p_at_bus(self.slack_bus)
            + self.loads.p_at_bus(self.slack_bus)
            + self.shunts.p_at_bus(self.slack_bus)
            + self.sgens.p_at_bus(self.slack_bus)
            + self.storages.p_at_bus(self.slack_bus);
        if let Some(slack_gen) = self.slack_gen {
            self.gens.set_p_slack(slack_gen, p_slack);
        }

        // reactive power drawn per bus goes to the generators hosted there
        let mut q_by_bus = vec![0.0; self.bus_vn_kv.len()];
        self.lines.add_q_by_bus(&mut q_by_bus);
        self.trafos.add_q_by_bus(&mut q_by_bus);
        self.loads.add_q_by_bus(&mut q_by_bus);
        self.shunts.add_q_by_bus(&mut q_by_bus);
        self.sgens.add_q_by_bus(&mut q_by_bus);
        self.storages.add_q_by_bus(&mut q_by_bus);
        self.gens.set_q(&q_by_bus);

        Ok(())
    }

    fn reset_results(&mut self) {
        self.lines.reset_results();
        self.trafos.reset_results();
        self.loads.reset_results();
        self.shunts.reset_results();
        self.sgens.reset_results();
        self.storages.reset_results();
        self.gens.reset_results();
    }

    /// Evaluate the nodal balance violation of an externally supplied
    /// voltage vector: `V .* conj(Ybus*V) - Sbus` per bus, with the power a
    /// generator legitimately provides zeroed out (active power at the
    /// slack bus; reactive power at generator buses, bounded by the
    /// aggregate generator limits when `check_q_limits` is set).
    pub fn check_solution(
        &self,
        v: &[Complex64],
        check_q_limits: bool,
    ) -> Result<Vec<Complex64>> {
        if v.len() != self.bus_vn_kv.len() {
            return Err(Error::InputSizeMismatch {
                expected: self.bus_vn_kv.len(),
                got: v.len(),
            });
        }
        let asm = self.assemble(true)?;
        let n = asm.bus_map.n_solver();

        let mut v_solver = vec![Complex64::default(); n];
        for solver_id in 0..n {
            v_solver[solver_id] = v[asm.bus_map.ext_id(solver_id)];
        }
        let i_bus = &asm.y_bus * &v_solver;
        let mut mis: Vec<Complex64> = (0..n)
            .map(|k| v_solver[k] * i_bus[k].conj() - asm.s_bus[k])
            .collect();

        mis[asm.slack_bus_solver].re = 0.0;
        let bounds = self.gens.q_bounds_by_bus(&asm.bus_map)?;
        for (b, bound) in bounds.iter().enumerate() {
            if let Some((lo, hi)) = bound {
                let supplied = if check_q_limits && lo <= hi {
                    mis[b].im.clamp(lo / self.sn_mva, hi / self.sn_mva)
                } else {
                    mis[b].im
                };
                mis[b].im -= supplied;
            }
        }

        Ok(expand_to_ext(&asm.bus_map, self.bus_vn_kv.len(), &mis))
    }

    // ---- state snapshot -------------------------------------------------

    pub fn get_state(&self) -> GridState {
        GridState {
            version: env!("CARGO_PKG_VERSION").to_string(),
            init_vm_pu: self.init_vm_pu,
            sn_mva: self.sn_mva,
            bus_vn_kv: self.bus_vn_kv.clone(),
            bus_status: self.bus_status.clone(),
            lines: self.lines.state(),
            shunts: self.shunts.state(),
            trafos: self.trafos.state(),
            gens: self.gens.state(),
            loads: self.loads.state(),
            sgens: self.sgens.state(),
            storages: self.storages.state(),
            slack_gen: self.slack_gen,
        }
    }

    pub fn set_state(&mut self, state: GridState) {
        self.reset();
        self.init_vm_pu = state.init_vm_pu;
        self.sn_mva = state.sn_mva;
        self.bus_vn_kv = state.bus_vn_kv;
        self.bus_status = state.bus_status;
        self.lines.set_state(state.lines);
        self.shunts.set_state(state.shunts);
        self.trafos.set_state(state.trafos);
        self.gens.set_state(state.gens);
        self.loads.set_state(state.loads);
        self.sgens.set_state(state.sgens);
        self.storages.set_state(state.storages);
        self.slack_gen = state.slack_gen;
        self.need_reset = true;
    }

    // ---- vectorized environment updates ----------------------------------

    /// Toggle the two busbars of every substation: row `i` of `active`
    /// controls external buses `i` and `i + nb_bus_before`.
    pub fn update_bus_status(&mut self, nb_bus_before: usize, active: &[[bool; 2]]) -> Result<()> {
        for (bus_id, flags) in active.iter().enumerate() {
            if flags[0] {
                self.reactivate_bus(bus_id)?;
            } else {
                self.deactivate_bus(bus_id)?;
            }
            if flags[1] {
                self.reactivate_bus(bus_id + nb_bus_before)?;
            } else {
                self.deactivate_bus(bus_id + nb_bus_before)?;
            }
        }
        Ok(())
    }

    fn update_continuous(
        &mut self,
        has_changed: &[bool],
        new_values: &[f64],
        apply: fn(&mut GridModel, usize, f64) -> Result<()>,
    ) -> Result<()> {
        if has_changed.len() != new_values.len() {
            return Err(Error::InputSizeMismatch {
                expected: has_changed.len(),
                got: new_values.len(),
            });
        }
        for el_id in 0..has_changed.len() {
            if has_changed[el_id] {
                apply(self, el_id, new_values[el_id])?;
            }
        }
        Ok(())
    }

    pub fn update_gens_p(&mut self, has_changed: &[bool], new_values: &[f64]) -> Result<()> {
        self.update_continuous(has_changed, new_values, GridModel::change_p_gen)
    }

    pub fn update_gens_v(&mut self, has_changed: &[bool], new_values: &[f64]) -> Result<()> {
        self.update_continuous(has_changed, new_values, GridModel::change_v_gen)
    }

    pub fn update_loads_p(&mut self, has_changed: &[bool], new_values: &[f64]) -> Result<()> {
        self.update_continuous(has_changed, new_values, GridModel::change_p_load)
    }

    pub fn update_loads_q(&mut self, has_changed: &[bool], new_values: &[f64]) -> Result<()> {
        self.update_continuous(has_changed, new_values, GridModel::change_q_load)
    }

    pub fn update_storages_p(&mut self, has_changed: &[bool], new_values: &[f64]) -> Result<()> {
        self.update_continuous(has_changed, new_values, GridModel::change_p_storage)
    }

    /// Apply a topology-vector update: for each element whose position
    /// changed, a value of 1 connects it to its substation's first busbar,
    /// 2 to the second (`subid + n_sub`), anything else disconnects it.
    pub fn update_topo(&mut self, has_changed: &[bool], new_values: &[i32]) -> Result<()> {
        if has_changed.len() != new_values.len() {
            return Err(Error::InputSizeMismatch {
                expected: has_changed.len(),
                got: new_values.len(),
            });
        }
        let topo = self.topo.clone();
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.load_pos,
            &topo.load_subid,
            GridModel::reactivate_load,
            GridModel::change_bus_load,
            GridModel::deactivate_load,
        )?;
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.gen_pos,
            &topo.gen_subid,
            GridModel::reactivate_gen,
            GridModel::change_bus_gen,
            GridModel::deactivate_gen,
        )?;
        // a disconnected line or trafo is assumed disconnected at both ends
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.line_or_pos,
            &topo.line_or_subid,
            GridModel::reactivate_powerline,
            GridModel::change_bus_powerline_or,
            GridModel::deactivate_powerline,
        )?;
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.line_ex_pos,
            &topo.line_ex_subid,
            GridModel::reactivate_powerline,
            GridModel::change_bus_powerline_ex,
            GridModel::deactivate_powerline,
        )?;
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.trafo_hv_pos,
            &topo.trafo_hv_subid,
            GridModel::reactivate_trafo,
            GridModel::change_bus_trafo_hv,
            GridModel::deactivate_trafo,
        )?;
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.trafo_lv_pos,
            &topo.trafo_lv_subid,
            GridModel::reactivate_trafo,
            GridModel::change_bus_trafo_lv,
            GridModel::deactivate_trafo,
        )?;
        self.update_topo_family(
            has_changed,
            new_values,
            &topo.storage_pos,
            &topo.storage_subid,
            GridModel::reactivate_storage,
            GridModel::change_bus_storage,
            GridModel::deactivate_storage,
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn update_topo_family(
        &mut self,
        has_changed: &[bool],
        new_values: &[i32],
        pos: &[usize],
        subid: &[usize],
        reactivate: fn(&mut GridModel, usize) -> Result<()>,
        change_bus: fn(&mut GridModel, usize, usize) -> Result<()>,
        deactivate: fn(&mut GridModel, usize) -> Result<()>,
    ) -> Result<()> {
        for el_id in 0..pos.len() {
            let p = pos[el_id];
            if !has_changed[p] {
                continue;
            }
            let new_bus = new_values[p];
            if new_bus > 0 {
                let init_bus = subid[el_id];
                let bus = if new_bus == 1 {
                    init_bus
                } else {
                    init_bus + self.n_sub
                };
                reactivate(self, el_id)?;
                change_bus(self, el_id, bus)?;
            } else {
                deactivate(self, el_id)?;
            }
        }
        Ok(())
    }

    pub fn set_n_sub(&mut self, n_sub: usize) {
        self.n_sub = n_sub;
    }

    pub fn set_load_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.load_pos = pos.to_vec();
    }

    pub fn set_gen_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.gen_pos = pos.to_vec();
    }

    pub fn set_line_or_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.line_or_pos = pos.to_vec();
    }

    pub fn set_line_ex_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.line_ex_pos = pos.to_vec();
    }

    pub fn set_trafo_hv_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.trafo_hv_pos = pos.to_vec();
    }

    pub fn set_trafo_lv_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.trafo_lv_pos = pos.to_vec();
    }

    pub fn set_storage_pos_topo_vect(&mut self, pos: &[usize]) {
        self.topo.storage_pos = pos.to_vec();
    }

    pub fn set_load_to_subid(&mut self, subid: &[usize]) {
        self.topo.load_subid = subid.to_vec();
    }

    pub fn set_gen_to_subid(&mut self, subid: &[usize]) {
        self.topo.gen_subid = subid.to_vec();
    }

    pub fn set_line_or_to_subid(&mut self, subid: &[usize]) {
        self.topo.line_or_subid = subid.to_vec();
    }

    pub fn set_line_ex_to_subid(&mut self, subid: &[usize]) {
        self.topo.line_ex_subid = subid.to_vec();
    }

    pub fn set_trafo_hv_to_subid(&mut self, subid: &[usize]) {
        self.topo.trafo_hv_subid = subid.to_vec();
    }

    pub fn set_trafo_lv_to_subid(&mut self, subid: &[usize]) {
        self.topo.trafo_lv_subid = subid.to_vec();
    }

    pub fn set_storage_to_subid(&mut self, subid: &[usize]) {
        self.topo.storage_subid = subid.to_vec();
    }

    // ---- solver by-products and results ----------------------------------

    pub fn get_ybus(&self) -> Option<&CSR<usize, Complex64>> {
        self.y_bus.as_ref()
    }

    pub fn get_sbus(&self) -> &[Complex64] {
        &self.s_bus
    }

    pub fn get_pv(&self) -> &[usize] {
        &self.bus_pv
    }

    pub fn get_pq(&self) -> &[usize] {
        &self.bus_pq
    }

    /// Solver-space voltage iterate of the last solve.
    pub fn get_v(&self) -> &[Complex64] {
        self.solver.get_v()
    }

    pub fn get_va(&self) -> &[f64] {
        self.solver.get_va()
    }

    pub fn get_vm(&self) -> &[f64] {
        self.solver.get_vm()
    }

    pub fn get_j(&self) -> Option<&CSC<usize, f64>> {
        self.solver.get_j()
    }

    pub fn converged(&self) -> bool {
        self.solver.converged()
    }

    pub fn iterations(&self) -> usize {
        self.solver.iterations()
    }

    pub fn computation_time(&self) -> f64 {
        self.solver.computation_time()
    }

    /// Failure recorded by the last solve when it did not converge.
    pub fn solver_error(&self) -> Option<&Error> {
        self.solver.error()
    }

    pub fn get_lineor_res(&self) -> &[BranchRes] {
        self.lines.res_from()
    }

    pub fn get_lineex_res(&self) -> &[BranchRes] {
        self.lines.res_to()
    }

    pub fn get_lines_status(&self) -> Vec<bool> {
        self.lines.status()
    }

    pub fn get_trafohv_res(&self) -> &[BranchRes] {
        self.trafos.res_hv()
    }

    pub fn get_trafolv_res(&self) -> &[BranchRes] {
        self.trafos.res_lv()
    }

    pub fn get_trafo_status(&self) -> Vec<bool> {
        self.trafos.status()
    }

    pub fn get_loads_res(&self) -> &[InjectionRes] {
        self.loads.res()
    }

    pub fn get_loads_status(&self) -> Vec<bool> {
        self.loads.status()
    }

    pub fn get_shunts_res(&self) -> &[InjectionRes] {
        self.shunts.res()
    }

    pub fn get_shunts_status(&self) -> Vec<bool> {
        self.shunts.status()
    }

    pub fn get_gen_res(&self) -> &[InjectionRes] {
        self.gens.res()
    }

    pub fn get_gen_status(&self) -> Vec<bool> {
        self.gens.status()
    }

    /// Per-generator flag raised when the reported Q hit a limit.
    pub fn get_gen_q_at_limit(&self) -> &[bool] {
        self.gens.q_at_limit()
    }

    pub fn get_sgens_res(&self) -> &[InjectionRes] {
        self.sgens.res()
    }

    pub fn get_sgens_status(&self) -> Vec<bool> {
        self.sgens.status()
    }

    pub fn get_storages_res(&self) -> &[InjectionRes] {
        self.storages.res()
    }

    pub fn get_storages_status(&self) -> Vec<bool> {
        self.storages.status()
    }
}

impl Clone for GridModel {
    /// An independent copy carrying the grid description but none of the
    /// derived state; the copy starts from a clean solver.
    fn clone(&self) -> Self {
        let mut copy = GridModel::new();
        copy.set_state(self.get_state());
        copy.solver.change_type(self.solver.get_type());
        copy.compute_results_flag = self.compute_results_flag;
        copy.n_sub = self.n_sub;
        copy.topo = self.topo.clone();
        copy
    }
}

/// Map a solver-sized vector back onto external bus ids, zero on
/// disconnected buses.
fn expand_to_ext(bus_map: &BusIndexMap, n_ext: usize, values: &[Complex64]) -> Vec<Complex64> {
    let mut res = vec![Complex64::default(); n_ext];
    for solver_id in 0..bus_map.n_solver() {
        res[bus_map.ext_id(solver_id)] = values[solver_id];
    }
    res
}

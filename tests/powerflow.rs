use gridflow::{Error, GridModel, SolverType};
use num_complex::Complex64;

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn flat(n: usize) -> Vec<Complex64> {
    vec![c(1.0, 0.0); n]
}

/// Slack generator holding 1.02 pu at bus 0, a 50 MW / 20 MVAr load at
/// bus 1, one line in between.
fn two_bus_grid() -> GridModel {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0]);
    grid.init_powerlines(&[0.01], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(&[0.0], &[1.02], &[-100.0], &[100.0], &[0])
        .unwrap();
    grid.init_loads(&[50.0], &[20.0], &[1]).unwrap();
    grid.add_slack_gen(0).unwrap();
    grid
}

#[test]
fn two_bus_resistive_line() {
    let mut grid = two_bus_grid();
    let v = grid.ac_pf(&flat(2), 10, 1e-8).unwrap();

    assert!(grid.converged());
    assert!(grid.iterations() <= 4);

    // slack bus pinned to the generator setpoint, reference angle zero
    assert!((v[0] - c(1.02, 0.0)).norm() < 1e-12);
    // load bus voltage satisfying V * conj(y * (V - V0)) = -(0.5 + 0.2j)
    assert!((v[1].re - 0.9926).abs() < 1e-4);
    assert!((v[1].im - (-0.0471)).abs() < 1e-4);

    // the solved point satisfies the nodal balance
    let mis = grid.check_solution(&v, false).unwrap();
    for m in &mis {
        assert!(m.norm() < 1e-7);
    }

    // slack generator covers the load plus the series loss
    let loss: f64 = grid.get_lineor_res()[0].p_mw + grid.get_lineex_res()[0].p_mw;
    let p_gen = grid.get_gen_res()[0].p_mw;
    assert!((p_gen - 50.0 - loss).abs() < 1e-6);
    assert!(loss > 0.0);
}

#[test]
fn slack_disconnect_is_rejected() {
    let mut grid = two_bus_grid();
    grid.deactivate_bus(0).unwrap();
    let err = grid.ac_pf(&flat(2), 10, 1e-8).unwrap_err();
    assert_eq!(err, Error::SlackDisconnected);
}

#[test]
fn generator_q_limit_is_reported() {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0]);
    grid.init_powerlines(&[0.01], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(
        &[0.0, 0.0],
        &[1.05, 1.04],
        &[-100.0, -10.0],
        &[100.0, 10.0],
        &[0, 1],
    )
    .unwrap();
    grid.init_loads(&[30.0], &[20.0], &[1]).unwrap();
    grid.add_slack_gen(0).unwrap();

    let v = grid.ac_pf(&flat(2), 20, 1e-8).unwrap();
    assert!(grid.converged());
    assert!(!v.is_empty());

    // bus 1 is PV: its magnitude holds the setpoint
    assert!((v[1].norm() - 1.04).abs() < 1e-9);

    // the local load needs more reactive power than the unit may provide:
    // the report clips at the limit and flags it, nothing is enforced
    let res = grid.get_gen_res();
    assert_eq!(res[1].q_mvar, 10.0);
    assert!(grid.get_gen_q_at_limit()[1]);
    assert!(!grid.get_gen_q_at_limit()[0]);
}

#[test]
fn dc_matches_ac_angles_on_a_lossless_line() {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0]);
    grid.init_powerlines(&[0.0], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(&[0.0], &[1.0], &[-100.0], &[100.0], &[0])
        .unwrap();
    // small transfer keeps the linearization error far below the tolerance
    grid.init_loads(&[0.1], &[0.0], &[1]).unwrap();
    grid.add_slack_gen(0).unwrap();

    let v_ac = grid.ac_pf(&flat(2), 20, 1e-12).unwrap();
    assert!(grid.converged());
    let v_dc = grid.dc_pf(&flat(2), 20, 1e-8).unwrap();
    assert!(grid.converged());

    for bus in 0..2 {
        assert!((v_ac[bus].arg() - v_dc[bus].arg()).abs() < 1e-6);
    }
    // the dc angle itself is -P * x
    assert!((v_dc[1].arg() - (-1e-4)).abs() < 1e-12);
}

#[test]
fn dc_magnitude_rules() {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0, 138.0]);
    grid.init_powerlines(&[0.01], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(&[0.0], &[1.05], &[-100.0], &[100.0], &[0])
        .unwrap();
    grid.init_loads(&[20.0], &[5.0], &[1]).unwrap();
    grid.add_slack_gen(0).unwrap();
    // a spare, deactivated bus stays out of the solver entirely
    grid.deactivate_bus(2).unwrap();

    let mut v_init = flat(3);
    v_init[0] = Complex64::from_polar(1.0, 0.1);
    let v = grid.dc_pf(&v_init, 20, 1e-8).unwrap();
    assert!(grid.converged());

    // slack magnitude comes from the generator setpoint, its angle from
    // the initial vector; plain PQ buses stay at 1 pu
    assert!((v[0].norm() - 1.05).abs() < 1e-12);
    assert!((v[0].arg() - 0.1).abs() < 1e-12);
    assert!((v[1].norm() - 1.0).abs() < 1e-12);
    assert_eq!(v[2], c(0.0, 0.0));
}

fn islanded_grid() -> GridModel {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0, 138.0]);
    grid.init_powerlines(&[0.01], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(&[0.0], &[1.02], &[-100.0], &[100.0], &[0])
        .unwrap();
    grid.init_loads(&[20.0], &[5.0], &[1]).unwrap();
    grid.add_slack_gen(0).unwrap();
    grid
}

#[test]
fn islanded_network_is_singular() {
    // bus 2 is connected but sees no branch at all
    let mut grid = islanded_grid();
    let v = grid.ac_pf(&flat(3), 10, 1e-8).unwrap();
    assert!(v.is_empty());
    assert!(!grid.converged());
    assert!(matches!(
        grid.solver_error(),
        Some(Error::JacobianSingular(_))
    ));

    let mut grid = islanded_grid();
    let v = grid.dc_pf(&flat(3), 10, 1e-8).unwrap();
    assert!(v.is_empty());
    assert!(!grid.converged());
    assert!(matches!(grid.solver_error(), Some(Error::DcSingular(_))));
}

#[test]
fn divergence_leaves_an_empty_vector_and_recovers() {
    let mut grid = two_bus_grid();
    // one iteration cannot reach 1e-12 from a flat start
    let v = grid.ac_pf(&flat(2), 1, 1e-12).unwrap();
    assert!(v.is_empty());
    assert!(!grid.converged());
    assert_eq!(grid.solver_error(), Some(&Error::MaxIterExceeded(1)));
    // results were cleared by the failed attempt
    assert_eq!(grid.get_gen_res()[0].p_mw, 0.0);

    // the grid is dirty but perfectly solvable again
    let v = grid.ac_pf(&flat(2), 10, 1e-8).unwrap();
    assert!(grid.converged());
    assert!(!v.is_empty());
}

#[test]
fn state_roundtrip_reproduces_the_solution() {
    let mut grid = two_bus_grid();
    let v_before = grid.ac_pf(&flat(2), 10, 1e-8).unwrap();

    let state = grid.get_state();
    let mut restored = GridModel::new();
    restored.set_state(state);
    let v_after = restored.ac_pf(&flat(2), 10, 1e-8).unwrap();

    assert_eq!(v_before.len(), v_after.len());
    for (a, b) in v_before.iter().zip(&v_after) {
        assert_eq!(a.re, b.re);
        assert_eq!(a.im, b.im);
    }
}

#[test]
fn deactivate_reactivate_is_invisible() {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0, 138.0]);
    grid.init_powerlines(
        &[0.01, 0.02, 0.015],
        &[0.1, 0.2, 0.15],
        &[c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)],
        &[0, 1, 0],
        &[1, 2, 2],
    )
    .unwrap();
    grid.init_generators(&[0.0], &[1.02], &[-100.0], &[100.0], &[0])
        .unwrap();
    grid.init_loads(&[30.0, 20.0], &[10.0, 5.0], &[1, 2]).unwrap();
    grid.add_slack_gen(0).unwrap();

    let v_base = grid.ac_pf(&flat(3), 10, 1e-8).unwrap();

    grid.deactivate_powerline(2).unwrap();
    grid.reactivate_powerline(2).unwrap();
    let v_again = grid.ac_pf(&flat(3), 10, 1e-8).unwrap();

    for (a, b) in v_base.iter().zip(&v_again) {
        assert_eq!(a.re, b.re);
        assert_eq!(a.im, b.im);
    }
}

#[test]
fn masked_updates_only_touch_flagged_elements() {
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);
    grid.init_bus(&[138.0, 138.0]);
    grid.init_powerlines(&[0.01], &[0.1], &[c(0.0, 0.0)], &[0], &[1])
        .unwrap();
    grid.init_generators(&[0.0], &[1.02], &[-100.0], &[100.0], &[0])
        .unwrap();
    grid.init_loads(&[30.0, 20.0], &[10.0, 5.0], &[1, 1]).unwrap();
    grid.add_slack_gen(0).unwrap();

    grid.update_loads_p(&[false, true], &[999.0, 25.0]).unwrap();
    grid.update_loads_q(&[true, false], &[12.0, 999.0]).unwrap();

    let state = grid.get_state();
    assert_eq!(state.loads[0].p_mw, 30.0);
    assert_eq!(state.loads[1].p_mw, 25.0);
    assert_eq!(state.loads[0].q_mvar, 12.0);
    assert_eq!(state.loads[1].q_mvar, 5.0);
}

/// A 14-bus transmission case with the usual mix of lines, tapped
/// transformers, generators, loads and one capacitor bank. Every
/// substation carries a second, initially de-energized busbar at
/// `bus + 14`.
fn case14() -> GridModel {
    let n_sub = 14;
    let mut grid = GridModel::new();
    grid.set_sn_mva(100.0);

    let mut vn_kv: Vec<f64> = (0..n_sub)
        .map(|b| if b < 5 { 138.0 } else { 69.0 })
        .collect();
    let second: Vec<f64> = vn_kv.clone();
    vn_kv.extend(second);
    grid.init_bus(&vn_kv);

    #[rustfmt::skip]
    let lines: [(usize, usize, f64, f64, f64); 17] = [
        (0, 1, 0.01938, 0.05917, 0.0528),
        (0, 4, 0.05403, 0.22304, 0.0492),
        (1, 2, 0.04699, 0.19797, 0.0438),
        (1, 3, 0.05811, 0.17632, 0.0340),
        (1, 4, 0.05695, 0.17388, 0.0346),
        (2, 3, 0.06701, 0.17103, 0.0128),
        (3, 4, 0.01335, 0.04211, 0.0),
        (5, 10, 0.09498, 0.19890, 0.0),
        (5, 11, 0.12291, 0.25581, 0.0),
        (5, 12, 0.06615, 0.13027, 0.0),
        (6, 7, 0.0, 0.17615, 0.0),
        (6, 8, 0.0, 0.11001, 0.0),
        (8, 9, 0.03181, 0.08450, 0.0),
        (8, 13, 0.12711, 0.27038, 0.0),
        (9, 10, 0.08205, 0.19207, 0.0),
        (11, 12, 0.22092, 0.19988, 0.0),
        (12, 13, 0.17093, 0.34802, 0.0),
    ];
    let r: Vec<f64> = lines.iter().map(|l| l.2).collect();
    let x: Vec<f64> = lines.iter().map(|l| l.3).collect();
    let h: Vec<Complex64> = lines.iter().map(|l| c(0.0, l.4)).collect();
    let from: Vec<usize> = lines.iter().map(|l| l.0).collect();
    let to: Vec<usize> = lines.iter().map(|l| l.1).collect();
    grid.init_powerlines(&r, &x, &h, &from, &to).unwrap();

    // three tapped transformers tie the 138 kV and 69 kV parts together
    grid.init_trafos(
        &[0.0, 0.0, 0.0],
        &[0.20912, 0.55618, 0.25202],
        &[c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)],
        &[1.0, 1.0, 1.0],
        &[-2.2, -3.1, -6.8],
        &[0.0, 0.0, 0.0],
        &[true, true, true],
        &[3, 3, 4],
        &[6, 8, 5],
    )
    .unwrap();

    grid.init_generators(
        &[232.4, 40.0, 0.0, 0.0, 0.0],
        &[1.06, 1.045, 1.01, 1.07, 1.09],
        &[-9999.0, -40.0, 0.0, -6.0, -6.0],
        &[9999.0, 50.0, 40.0, 24.0, 24.0],
        &[0, 1, 2, 5, 7],
    )
    .unwrap();

    // the 7.6 MW load of substation 4 is split into two equal halves
    grid.init_loads(
        &[
            21.7, 94.2, 47.8, 3.8, 3.8, 11.2, 29.5, 9.0, 3.5, 6.1, 13.5, 14.9,
        ],
        &[
            12.7, 19.0, -3.9, 0.8, 0.8, 7.5, 16.6, 5.8, 1.8, 1.6, 5.8, 5.0,
        ],
        &[1, 2, 3, 4, 4, 5, 8, 9, 10, 11, 12, 13],
    )
    .unwrap();

    // capacitor bank at bus 8
    grid.init_shunts(&[0.0], &[-19.0], &[8]).unwrap();

    grid.init_sgens(&[5.0], &[1.0], &[0.0], &[10.0], &[-5.0], &[5.0], &[12])
        .unwrap();
    grid.init_storages(&[-2.0], &[0.0], &[10]).unwrap();

    grid.add_slack_gen(0).unwrap();

    // wiring of the environment-facing topology vector
    grid.set_n_sub(n_sub);
    let n_load = 12;
    let n_gen = 5;
    let n_line = 17;
    let n_trafo = 3;
    let load_pos: Vec<usize> = (0..n_load).collect();
    let gen_pos: Vec<usize> = (n_load..n_load + n_gen).collect();
    let line_or_pos: Vec<usize> = (17..17 + n_line).collect();
    let line_ex_pos: Vec<usize> = (34..34 + n_line).collect();
    let trafo_hv_pos: Vec<usize> = (51..51 + n_trafo).collect();
    let trafo_lv_pos: Vec<usize> = (54..54 + n_trafo).collect();
    grid.set_load_pos_topo_vect(&load_pos);
    grid.set_gen_pos_topo_vect(&gen_pos);
    grid.set_line_or_pos_topo_vect(&line_or_pos);
    grid.set_line_ex_pos_topo_vect(&line_ex_pos);
    grid.set_trafo_hv_pos_topo_vect(&trafo_hv_pos);
    grid.set_trafo_lv_pos_topo_vect(&trafo_lv_pos);
    grid.set_storage_pos_topo_vect(&[57]);
    grid.set_load_to_subid(&[1, 2, 3, 4, 4, 5, 8, 9, 10, 11, 12, 13]);
    grid.set_gen_to_subid(&[0, 1, 2, 5, 7]);
    grid.set_line_or_to_subid(&from);
    grid.set_line_ex_to_subid(&to);
    grid.set_trafo_hv_to_subid(&[3, 3, 4]);
    grid.set_trafo_lv_to_subid(&[6, 8, 5]);
    grid.set_storage_to_subid(&[10]);

    // all second busbars start de-energized
    let active = vec![[true, false]; n_sub];
    grid.update_bus_status(n_sub, &active).unwrap();

    grid
}

fn total_load_p(grid: &GridModel) -> f64 {
    grid.get_loads_res().iter().map(|r| r.p_mw).sum()
}

#[test]
fn case14_converges_and_balances() {
    let mut grid = case14();
    let v = grid.ac_pf(&flat(28), 10, 1e-8).unwrap();
    assert!(grid.converged());
    assert!(grid.iterations() <= 6);

    // second busbars are de-energized
    for bus in 14..28 {
        assert_eq!(v[bus], c(0.0, 0.0));
    }

    // energy balance: generation covers load, storage charging, network
    // losses and the (here negative) shunt draw
    let p_gen: f64 = grid.get_gen_res().iter().map(|r| r.p_mw).sum();
    let p_sgen: f64 = grid.get_sgens_res().iter().map(|r| r.p_mw).sum();
    let p_storage: f64 = grid.get_storages_res().iter().map(|r| r.p_mw).sum();
    let p_load = total_load_p(&grid);
    let p_shunt: f64 = grid.get_shunts_res().iter().map(|r| r.p_mw).sum();
    let loss_lines: f64 = grid
        .get_lineor_res()
        .iter()
        .zip(grid.get_lineex_res())
        .map(|(f, t)| f.p_mw + t.p_mw)
        .sum();
    let loss_trafos: f64 = grid
        .get_trafohv_res()
        .iter()
        .zip(grid.get_trafolv_res())
        .map(|(h, l)| h.p_mw + l.p_mw)
        .sum();
    let balance = p_gen + p_sgen + p_storage - p_load - p_shunt - loss_lines - loss_trafos;
    assert!(balance.abs() < 1e-4, "balance off by {}", balance);

    // the solved point satisfies the nodal equations
    let mis = grid.check_solution(&v, false).unwrap();
    for m in &mis {
        assert!(m.norm() < 1e-6);
    }
}

#[test]
fn substation_split_keeps_the_load_served() {
    let mut grid = case14();
    grid.ac_pf(&flat(28), 10, 1e-8).unwrap();
    assert!(grid.converged());
    let load_before = total_load_p(&grid);

    // energize the second busbar of substation 4 and move half its feeders
    // there: one line end, one transformer end and one of the two loads
    let mut active = vec![[true, false]; 14];
    active[4] = [true, true];
    grid.update_bus_status(14, &active).unwrap();

    let mut has_changed = vec![false; 58];
    let mut new_values = vec![0i32; 58];
    has_changed[4] = true; // second half-load of substation 4
    new_values[4] = 2;
    has_changed[35] = true; // line 1 (0 -> 4), ex end
    new_values[35] = 2;
    has_changed[53] = true; // trafo 2 (4 -> 5), hv end
    new_values[53] = 2;
    grid.update_topo(&has_changed, &new_values).unwrap();

    assert_eq!(grid.get_bus_load(4).unwrap(), 18);
    assert_eq!(grid.get_bus_powerline_ex(1).unwrap(), 18);
    assert_eq!(grid.get_bus_trafo_hv(2).unwrap(), 18);

    let v = grid.ac_pf(&flat(28), 10, 1e-8).unwrap();
    assert!(grid.converged());
    assert!(grid.iterations() <= 6);

    // the new busbar is energized and the served load is unchanged
    assert!(v[18].norm() > 0.5);
    let load_after = total_load_p(&grid);
    assert!((load_before - load_after).abs() < 1e-9);
}

#[test]
fn cloned_grids_solve_independently() {
    let grid = case14();
    let mut a = grid.clone();
    let mut b = grid.clone();

    b.change_p_load(0, 30.0).unwrap();

    let va = a.ac_pf(&flat(28), 10, 1e-8).unwrap();
    let vb = b.ac_pf(&flat(28), 10, 1e-8).unwrap();
    assert!(a.converged() && b.converged());
    assert!((va[1] - vb[1]).norm() > 1e-6);
}

#[test]
fn dc_solver_selection_is_restored() {
    let mut grid = two_bus_grid();
    assert_eq!(grid.get_solver_type(), SolverType::SparseLu);
    grid.dc_pf(&flat(2), 10, 1e-8).unwrap();
    assert_eq!(grid.get_solver_type(), SolverType::SparseLu);
    assert_eq!(grid.iterations(), 1);
    assert!(grid.computation_time() >= 0.0);
}

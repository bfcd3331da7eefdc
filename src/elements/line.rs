use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{
    amps_ka, check_bus, check_id, check_init_len, solver_bus, BranchRes, Element, Triplet,
};
use crate::error::Result;

/// A transmission line modelled as a pi-equivalent: series impedance
/// `r + jx` and the total charging admittance `h` split evenly between the
/// two ends. All parameters are in per unit on the system base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub from_bus: usize,
    pub to_bus: usize,
    pub r: f64,
    pub x: f64,
    pub h: Complex64,
    pub status: bool,
}

impl Line {
    /// Terminal admittances (y_ff, y_ft, y_tf, y_tt) of the pi model.
    fn admittances(&self, ac: bool) -> Option<(Complex64, Complex64, Complex64, Complex64)> {
        if ac {
            let z = Complex64::new(self.r, self.x);
            if z.norm_sqr() == 0.0 {
                return None;
            }
            let y_s = Complex64::new(1.0, 0.0) / z;
            let y_tt = y_s + self.h * 0.5;
            Some((y_tt, -y_s, -y_s, y_tt))
        } else {
            if self.x == 0.0 {
                return None;
            }
            let y = Complex64::new(1.0 / self.x, 0.0);
            Some((y, -y, -y, y))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Lines {
    line: Vec<Line>,
    res_from: Vec<BranchRes>,
    res_to: Vec<BranchRes>,
}

impl Lines {
    pub(crate) fn init(
        &mut self,
        r: &[f64],
        x: &[f64],
        h: &[Complex64],
        from_bus: &[usize],
        to_bus: &[usize],
    ) -> Result<()> {
        check_init_len(r.len(), x.len())?;
        check_init_len(r.len(), h.len())?;
        check_init_len(r.len(), from_bus.len())?;
        check_init_len(r.len(), to_bus.len())?;

        self.line = (0..r.len())
            .map(|i| Line {
                from_bus: from_bus[i],
                to_bus: to_bus[i],
                r: r[i],
                x: x[i],
                h: h[i],
                status: true,
            })
            .collect();
        self.reset_results();
        Ok(())
    }

    pub fn nb(&self) -> usize {
        self.line.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.line.len(), "line", id)?;
        self.line[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.line.len(), "line", id)?;
        self.line[id].status = true;
        Ok(())
    }

    pub(crate) fn change_from_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.line.len(), "line", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.line[id].from_bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_to_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.line.len(), "line", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.line[id].to_bus = new_bus;
        Ok(())
    }

    pub fn from_bus(&self, id: usize) -> Result<usize> {
        check_id(self.line.len(), "line", id)?;
        Ok(self.line[id].from_bus)
    }

    pub fn to_bus(&self, id: usize) -> Result<usize> {
        check_id(self.line.len(), "line", id)?;
        Ok(self.line[id].to_bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.line.iter().map(|l| l.status).collect()
    }

    pub fn res_from(&self) -> &[BranchRes] {
        &self.res_from
    }

    pub fn res_to(&self) -> &[BranchRes] {
        &self.res_to
    }

    pub(crate) fn reset_results(&mut self) {
        self.res_from = vec![BranchRes::default(); self.line.len()];
        self.res_to = vec![BranchRes::default(); self.line.len()];
    }

    /// Terminal flows from the solved voltages: S = V * conj(I) per end,
    /// currents from the pi model.
    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, line) in self.line.iter().enumerate() {
            if !line.status {
                continue;
            }
            let f = solver_bus(bus_map, "line", i, line.from_bus)?;
            let t = solver_bus(bus_map, "line", i, line.to_bus)?;
            let (y_ff, y_ft, y_tf, y_tt) = match line.admittances(true) {
                Some(y) => y,
                None => continue,
            };
            let i_from = y_ff * v[f] + y_ft * v[t];
            let i_to = y_tf * v[f] + y_tt * v[t];
            let s_from = v[f] * i_from.conj() * sn_mva;
            let s_to = v[t] * i_to.conj() * sn_mva;

            let v_from_kv = v[f].norm() * bus_vn_kv[line.from_bus];
            let v_to_kv = v[t].norm() * bus_vn_kv[line.to_bus];
            self.res_from[i] = BranchRes {
                p_mw: s_from.re,
                q_mvar: s_from.im,
                v_kv: v_from_kv,
                a_ka: amps_ka(s_from.re, s_from.im, v_from_kv),
            };
            self.res_to[i] = BranchRes {
                p_mw: s_to.re,
                q_mvar: s_to.im,
                v_kv: v_to_kv,
                a_ka: amps_ka(s_to.re, s_to.im, v_to_kv),
            };
        }
        Ok(())
    }

    /// Active power drawn from `bus` by the lines connected to it (MW).
    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        let mut p = 0.0;
        for (i, line) in self.line.iter().enumerate() {
            if !line.status {
                continue;
            }
            if line.from_bus == bus {
                p += self.res_from[i].p_mw;
            }
            if line.to_bus == bus {
                p += self.res_to[i].p_mw;
            }
        }
        p
    }

    /// Accumulate reactive power drawn per external bus (MVAr).
    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for (i, line) in self.line.iter().enumerate() {
            if !line.status {
                continue;
            }
            q[line.from_bus] += self.res_from[i].q_mvar;
            q[line.to_bus] += self.res_to[i].q_mvar;
        }
    }

    pub(crate) fn state(&self) -> Vec<Line> {
        self.line.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Line>) {
        self.line = state;
        self.reset_results();
    }
}

impl Element for Lines {
    fn fill_ybus(
        &self,
        triplets: &mut Vec<Triplet>,
        ac: bool,
        bus_map: &BusIndexMap,
        _sn_mva: f64,
    ) -> Result<()> {
        for (i, line) in self.line.iter().enumerate() {
            if !line.status {
                continue;
            }
            let f = solver_bus(bus_map, "line", i, line.from_bus)?;
            let t = solver_bus(bus_map, "line", i, line.to_bus)?;
            if let Some((y_ff, y_ft, y_tf, y_tt)) = line.admittances(ac) {
                triplets.push((f, f, y_ff));
                triplets.push((f, t, y_ft));
                triplets.push((t, f, y_tf));
                triplets.push((t, t, y_tt));
            }
        }
        Ok(())
    }
}

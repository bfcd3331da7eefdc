use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bus::BusIndexMap;
use crate::elements::{
    amps_ka, check_bus, check_id, check_init_len, solver_bus, BranchRes, Element, Triplet,
};
use crate::error::Result;

/// A two-winding transformer as a pi-equivalent with the off-nominal complex
/// ratio placed on the tap side.
///
/// The effective turns ratio is derived from the discrete tap setting:
/// `n = 1 + tap_pos * tap_step_pct / 100`, and the phase shift adds a complex
/// rotation, `t = n * e^{j shift}`. `b` is the magnetizing admittance in per
/// unit on the system base, split evenly between the two ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trafo {
    pub hv_bus: usize,
    pub lv_bus: usize,
    pub r: f64,
    pub x: f64,
    pub b: Complex64,
    pub tap_pos: f64,
    pub tap_step_pct: f64,
    pub shift_deg: f64,
    pub tap_hv: bool,
    pub status: bool,
}

impl Trafo {
    pub fn ratio(&self) -> f64 {
        1.0 + self.tap_pos * self.tap_step_pct / 100.0
    }

    /// Terminal admittances (y_hh, y_hl, y_lh, y_ll).
    fn admittances(&self, ac: bool) -> Option<(Complex64, Complex64, Complex64, Complex64)> {
        if ac {
            let z = Complex64::new(self.r, self.x);
            if z.norm_sqr() == 0.0 {
                return None;
            }
            let y_s = Complex64::new(1.0, 0.0) / z;
            let y_tt = y_s + self.b * 0.5;
            let t = Complex64::from_polar(self.ratio(), self.shift_deg.to_radians());
            if self.tap_hv {
                Some((y_tt / (t * t.conj()), -y_s / t.conj(), -y_s / t, y_tt))
            } else {
                Some((y_tt, -y_s / t, -y_s / t.conj(), y_tt / (t * t.conj())))
            }
        } else {
            // susceptance-only linearization, phase shift dropped
            if self.x == 0.0 {
                return None;
            }
            let y = 1.0 / self.x;
            let n = self.ratio();
            let (y_tap, y_other) = (y / (n * n), y);
            let y_off = Complex64::new(-y / n, 0.0);
            if self.tap_hv {
                Some((
                    Complex64::new(y_tap, 0.0),
                    y_off,
                    y_off,
                    Complex64::new(y_other, 0.0),
                ))
            } else {
                Some((
                    Complex64::new(y_other, 0.0),
                    y_off,
                    y_off,
                    Complex64::new(y_tap, 0.0),
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Trafos {
    trafo: Vec<Trafo>,
    res_hv: Vec<BranchRes>,
    res_lv: Vec<BranchRes>,
}

impl Trafos {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn init(
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
        check_init_len(r.len(), x.len())?;
        check_init_len(r.len(), b.len())?;
        check_init_len(r.len(), tap_step_pct.len())?;
        check_init_len(r.len(), tap_pos.len())?;
        check_init_len(r.len(), shift_deg.len())?;
        check_init_len(r.len(), tap_hv.len())?;
        check_init_len(r.len(), hv_bus.len())?;
        check_init_len(r.len(), lv_bus.len())?;

        self.trafo = (0..r.len())
            .map(|i| Trafo {
                hv_bus: hv_bus[i],
                lv_bus: lv_bus[i],
                r: r[i],
                x: x[i],
                b: b[i],
                tap_pos: tap_pos[i],
                tap_step_pct: tap_step_pct[i],
                shift_deg: shift_deg[i],
                tap_hv: tap_hv[i],
                status: true,
            })
            .collect();
        self.reset_results();
        Ok(())
    }

    pub fn nb(&self) -> usize {
        self.trafo.len()
    }

    pub(crate) fn deactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.trafo.len(), "trafo", id)?;
        self.trafo[id].status = false;
        Ok(())
    }

    pub(crate) fn reactivate(&mut self, id: usize) -> Result<()> {
        check_id(self.trafo.len(), "trafo", id)?;
        self.trafo[id].status = true;
        Ok(())
    }

    pub(crate) fn change_hv_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.trafo.len(), "trafo", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.trafo[id].hv_bus = new_bus;
        Ok(())
    }

    pub(crate) fn change_lv_bus(&mut self, id: usize, new_bus: usize, n_bus: usize) -> Result<()> {
        check_id(self.trafo.len(), "trafo", id)?;
        check_bus(n_bus, "bus", new_bus)?;
        self.trafo[id].lv_bus = new_bus;
        Ok(())
    }

    pub fn hv_bus(&self, id: usize) -> Result<usize> {
        check_id(self.trafo.len(), "trafo", id)?;
        Ok(self.trafo[id].hv_bus)
    }

    pub fn lv_bus(&self, id: usize) -> Result<usize> {
        check_id(self.trafo.len(), "trafo", id)?;
        Ok(self.trafo[id].lv_bus)
    }

    pub fn status(&self) -> Vec<bool> {
        self.trafo.iter().map(|t| t.status).collect()
    }

    pub fn res_hv(&self) -> &[BranchRes] {
        &self.res_hv
    }

    pub fn res_lv(&self) -> &[BranchRes] {
        &self.res_lv
    }

    pub(crate) fn reset_results(&mut self) {
        self.res_hv = vec![BranchRes::default(); self.trafo.len()];
        self.res_lv = vec![BranchRes::default(); self.trafo.len()];
    }

    pub(crate) fn compute_results(
        &mut self,
        v: &[Complex64],
        bus_map: &BusIndexMap,
        bus_vn_kv: &[f64],
        sn_mva: f64,
    ) -> Result<()> {
        self.reset_results();
        for (i, trafo) in self.trafo.iter().enumerate() {
            if !trafo.status {
                continue;
            }
            let h = solver_bus(bus_map, "trafo", i, trafo.hv_bus)?;
            let l = solver_bus(bus_map, "trafo", i, trafo.lv_bus)?;
            let (y_hh, y_hl, y_lh, y_ll) = match trafo.admittances(true) {
                Some(y) => y,
                None => continue,
            };
            let i_hv = y_hh * v[h] + y_hl * v[l];
            let i_lv = y_lh * v[h] + y_ll * v[l];
            let s_hv = v[h] * i_hv.conj() * sn_mva;
            let s_lv = v[l] * i_lv.conj() * sn_mva;

            let v_hv_kv = v[h].norm() * bus_vn_kv[trafo.hv_bus];
            let v_lv_kv = v[l].norm() * bus_vn_kv[trafo.lv_bus];
            self.res_hv[i] = BranchRes {
                p_mw: s_hv.re,
                q_mvar: s_hv.im,
                v_kv: v_hv_kv,
                a_ka: amps_ka(s_hv.re, s_hv.im, v_hv_kv),
            };
            self.res_lv[i] = BranchRes {
                p_mw: s_lv.re,
                q_mvar: s_lv.im,
                v_kv: v_lv_kv,
                a_ka: amps_ka(s_lv.re, s_lv.im, v_lv_kv),
            };
        }
        Ok(())
    }

    pub(crate) fn p_at_bus(&self, bus: usize) -> f64 {
        let mut p = 0.0;
        for (i, trafo) in self.trafo.iter().enumerate() {
            if !trafo.status {
                continue;
            }
            if trafo.hv_bus == bus {
                p += self.res_hv[i].p_mw;
            }
            if trafo.lv_bus == bus {
                p += self.res_lv[i].p_mw;
            }
        }
        p
    }

    pub(crate) fn add_q_by_bus(&self, q: &mut [f64]) {
        for (i, trafo) in self.trafo.iter().enumerate() {
            if !trafo.status {
                continue;
            }
            q[trafo.hv_bus] += self.res_hv[i].q_mvar;
            q[trafo.lv_bus] += self.res_lv[i].q_mvar;
        }
    }

    pub(crate) fn state(&self) -> Vec<Trafo> {
        self.trafo.clone()
    }

    pub(crate) fn set_state(&mut self, state: Vec<Trafo>) {
        self.trafo = state;
        self.reset_results();
    }
}

impl Element for Trafos {
    fn fill_ybus(
        &self,
        triplets: &mut Vec<Triplet>,
        ac: bool,
        bus_map: &BusIndexMap,
        _sn_mva: f64,
    ) -> Result<()> {
        for (i, trafo) in self.trafo.iter().enumerate() {
            if !trafo.status {
                continue;
            }
            let h = solver_bus(bus_map, "trafo", i, trafo.hv_bus)?;
            let l = solver_bus(bus_map, "trafo", i, trafo.lv_bus)?;
            if let Some((y_hh, y_hl, y_lh, y_ll)) = trafo.admittances(ac) {
                triplets.push((h, h, y_hh));
                triplets.push((h, l, y_hl));
                triplets.push((l, h, y_lh));
                triplets.push((l, l, y_ll));
            }
        }
        Ok(())
    }
}

/// Bijection between external bus ids (stable, may include deactivated
/// buses) and solver bus ids (dense, connected buses only).
///
/// Rebuilt from the bus status vector on every reset: connected buses are
/// assigned dense indices in ascending external order.
#[derive(Debug, Clone, Default)]
pub struct BusIndexMap {
    ext_to_solver: Vec<Option<usize>>,
    solver_to_ext: Vec<usize>,
}

impl BusIndexMap {
    pub fn build(bus_status: &[bool]) -> Self {
        let mut ext_to_solver = vec![None; bus_status.len()];
        let mut solver_to_ext = Vec::with_capacity(bus_status.len());
        for (ext, &connected) in bus_status.iter().enumerate() {
            if connected {
                ext_to_solver[ext] = Some(solver_to_ext.len());
                solver_to_ext.push(ext);
            }
        }
        Self {
            ext_to_solver,
            solver_to_ext,
        }
    }

    /// Solver id of an external bus, `None` if the bus is deactivated.
    pub fn solver_id(&self, ext: usize) -> Option<usize> {
        self.ext_to_solver.get(ext).copied().flatten()
    }

    /// External id of a solver bus.
    pub fn ext_id(&self, solver: usize) -> usize {
        self.solver_to_ext[solver]
    }

    /// Number of connected buses seen by the solver.
    pub fn n_solver(&self) -> usize {
        self.solver_to_ext.len()
    }

    pub fn n_ext(&self) -> usize {
        self.ext_to_solver.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_are_mutual_inverses() {
        let status = [true, false, true, true, false, true];
        let map = BusIndexMap::build(&status);

        assert_eq!(map.n_solver(), 4);
        assert_eq!(map.n_ext(), 6);
        for ext in 0..status.len() {
            match map.solver_id(ext) {
                Some(solver) => {
                    assert!(status[ext]);
                    assert_eq!(map.ext_id(solver), ext);
                }
                None => assert!(!status[ext]),
            }
        }
        for solver in 0..map.n_solver() {
            assert_eq!(map.solver_id(map.ext_id(solver)), Some(solver));
        }
    }

    #[test]
    fn dense_ids_follow_external_order() {
        let map = BusIndexMap::build(&[false, true, true]);
        assert_eq!(map.solver_id(1), Some(0));
        assert_eq!(map.solver_id(2), Some(1));
        assert_eq!(map.solver_id(0), None);
    }
}

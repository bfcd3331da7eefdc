mod bus;
mod dc;
mod elements;
mod error;
mod grid;
mod jacobian;
mod linsolve;
mod newton;
mod solver;

pub use bus::BusIndexMap;
pub use elements::{
    BranchRes, Gen, Gens, InjectionRes, Line, Lines, Load, Loads, SGen, SGens, Shunt, Shunts,
    Storage, Storages, Trafo, Trafos,
};
pub use error::{Error, Result};
pub use grid::{GridModel, GridState};
pub use solver::{Solver, SolverType};

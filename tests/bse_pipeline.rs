use dmft_bse::index_pair::FlavorIndexMap;
use dmft_bse::*;
use ndarray::{Array3, Array4};
use num_complex::Complex64;
use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};

static CWD: Mutex<()> = Mutex::new(());

fn cwd_lock() -> MutexGuard<'static, ()> {
    CWD.lock().unwrap_or_else(|e| e.into_inner())
}

const BETA: f64 = 10.0;
const N_IW: usize = 8;
const NUM_WB: usize = 2;
const NUM_WF: usize = 4;

fn spins() -> Vec<String> {
    vec!["up".to_string(), "down".to_string()]
}

#[derive(Default)]
struct Calls {
    constructed: usize,
    solved_in: Vec<PathBuf>,
    mpirun: Vec<String>,
    seeds: Vec<i64>,
    sumk: Vec<SumkParams>,
}

type Log = Rc<RefCell<Calls>>;

/// G_imp = -0.5i on the orbital diagonal of both spins.
fn gimp(gf_struct: &GfStruct) -> BlockGf {
    let mut g = BlockGf::zeros(gf_struct, N_IW);
    for name in gf_struct.keys() {
        let block = g.get_mut(name).unwrap();
        for o in 0..block.shape()[1] {
            block.slice_mut(ndarray::s![.., o, o]).fill(Complex64::new(0.0, -0.5));
        }
    }
    g
}

struct FakeSolver {
    gf_struct: GfStruct,
    log: Log,
}

impl ImpuritySolver for FakeSolver {
    fn set_g0_iw(&mut self, g0_iw: BlockGf) -> Result<()> {
        assert_eq!(g0_iw.n_iw(), N_IW);
        Ok(())
    }

    fn calc_g2(&mut self, _rot: Option<&BasisRotation>, mpirun: &str, params: &SolverParams) -> Result<G2Loc> {
        let mut log = self.log.borrow_mut();
        log.solved_in.push(env::current_dir()?);
        log.mpirun.push(mpirun.to_string());
        log.seeds.push(params.random_seed_offset);
        let mut x = G2Loc::new(params.num_wb, params.num_wf)?;
        // (up 0, up 0, up 0, up 0) and (up 0, up 0, down 0, down 0)
        for key in [(0, 0, 0, 0), (0, 0, 2, 2)] {
            let data = Array3::from_shape_fn((params.num_wb, params.num_wf, params.num_wf), |(wb, _, _)| {
                Complex64::new(1.0 + wb as f64, 0.0)
            });
            x.insert(key, data)?;
        }
        Ok(x)
    }

    fn get_gimp_iw(&self) -> Result<BlockGf> {
        Ok(gimp(&self.gf_struct))
    }
}

struct PassThrough;

impl WeissField for PassThrough {
    fn weiss_field(&self, _sigma_iw: &BlockGf, gloc_iw: &BlockGf) -> Result<BlockGf> {
        Ok(gloc_iw.clone())
    }

    fn diag_basis(&self, _g0_iw: &BlockGf) -> Result<BasisRotation> {
        Ok(BasisRotation::new())
    }
}

/// Writes the archive metadata the way the k-summation does.
struct FakeLattice {
    n_corr_shells: usize,
    log: Log,
}

impl LatticeBackend for FakeLattice {
    fn calc_gloc(&self, dmft: &DmftSolution) -> Result<Vec<BlockGf>> {
        Ok(dmft.shells.iter().map(|s| BlockGf::zeros(&s.gf_struct, N_IW)).collect())
    }

    fn run_bse(&self, _archive: &Path, _work_dir: &Path, _mpirun: &str, params: &SumkParams) -> Result<()> {
        let archive = DirArchive::open(&params.bse_h5_out_file)?;
        SaveBse::new(archive, BseInfo::Save, self.n_corr_shells, 4, false, false, params.beta, &spins(), "")?;
        self.log.borrow_mut().sumk.push(params.clone());
        Ok(())
    }
}

fn collaborators(n_corr_shells: usize, log: &Log) -> Collaborators {
    let mut solvers = SolverRegistry::new();
    let solver_log = log.clone();
    solvers.register("fake", move |spec| {
        solver_log.borrow_mut().constructed += 1;
        Ok(Box::new(FakeSolver {
            gf_struct: spec.gf_struct.clone(),
            log: solver_log.clone(),
        }))
    });
    Collaborators {
        solvers,
        lattice: Box::new(FakeLattice {
            n_corr_shells,
            log: log.clone(),
        }),
        weiss: Box::new(PassThrough),
    }
}

fn density_density(n_orb: usize, u: f64) -> Array4<Complex64> {
    let n = 2 * n_orb;
    let mut u_mat = Array4::zeros((n, n, n, n));
    for a in 0..n {
        for b in 0..n {
            if a != b {
                u_mat[[a, b, a, b]] = Complex64::new(u, 0.0);
            }
        }
    }
    u_mat
}

fn shell(n_orb: usize) -> InequivShell {
    let orbs: Vec<usize> = (0..n_orb).collect();
    let gf_struct = GfStruct::from([("up".to_string(), orbs.clone()), ("down".to_string(), orbs)]);
    InequivShell {
        sigma_iw: BlockGf::zeros(&gf_struct, N_IW),
        gf_struct,
        u_mat: density_density(n_orb, 2.0),
    }
}

fn dmft(orbs: &[usize], corr_to_inequiv: Vec<usize>) -> DmftSolution {
    DmftSolution {
        iteration_number: 5,
        chemical_potential: 1.0,
        use_spin_orbit: false,
        spin_block_names: spins(),
        n_corr_shells: corr_to_inequiv.len(),
        corr_to_inequiv,
        shells: orbs.iter().map(|&n| shell(n)).collect(),
    }
}

fn input(dir: &Path, extra_bse: &str) -> String {
    let path = |name: &str| format!("{:?}", dir.join(name).display().to_string());
    format!(
        r#"
[model]
seedname = {seed}
lattice = "square"
nk = 4

[system]
beta = {BETA:?}
n_iw = {N_IW}

[impurity_solver]
name = "fake"

[bse]
num_wb = {NUM_WB}
num_wf = {NUM_WF}
h5_output_file = {h5}
work_dir = {work}
{extra_bse}
"#,
        seed = path("square"),
        h5 = path("dmft_bse.h5"),
        work = path("work"),
    )
}

fn write_inputs(dir: &Path, dmft: &DmftSolution, extra_bse: &str) -> PathBuf {
    dmft.save(dir.join("square.out.json")).unwrap();
    let input_file = dir.join("dmft.toml");
    fs::write(&input_file, input(dir, extra_bse)).unwrap();
    input_file
}

#[test]
fn full_pipeline_writes_xloc_and_gamma0() {
    let _lock = cwd_lock();
    let tmp = tempfile::tempdir().unwrap();
    let before = env::current_dir().unwrap();
    let log = Log::default();
    let input_file = write_inputs(tmp.path(), &dmft(&[2, 2], vec![0, 1, 0]), "");

    let stages = dcore_bse(&input_file, 2, collaborators(3, &log)).unwrap();
    assert_eq!(stages, vec![ShellStage::Persisted; 2]);
    assert_eq!(env::current_dir().unwrap(), before);

    let calls = log.borrow();
    assert_eq!(calls.constructed, 2);
    assert_eq!(calls.seeds, vec![0, 1000]);
    assert_eq!(calls.mpirun, vec!["mpirun -np 2".to_string(); 2]);
    for (ish, dir) in calls.solved_in.iter().enumerate() {
        let expected = tmp.path().join("work").join(format!("imp_shell{}_bse", ish));
        assert_eq!(fs::canonicalize(dir).unwrap(), fs::canonicalize(expected).unwrap());
    }
    let sumk = &calls.sumk[0];
    assert_eq!(sumk.calc_mode, "bse");
    assert_eq!(sumk.list_wb, vec![0, 1]);
    assert_eq!(sumk.div, [4, 4, 1]);
    assert_eq!(sumk.x0q_qpoints_saved, QPointSelection::Quadrant);

    let archive = DirArchive::open(tmp.path().join("dmft_bse.h5")).unwrap();
    let bse = SaveBse::new(archive, BseInfo::Check, 3, 4, false, false, BETA, &spins(), "").unwrap();
    let index: &FlavorIndexMap = bse.index();

    // one (uu, uu) and one (uu, dd) block for every correlated shell
    let xloc0 = bse.load_xloc(0).unwrap();
    let xloc1 = bse.load_xloc(1).unwrap();
    assert_eq!(xloc0.len(), 6);
    for icrsh in 0..3 {
        for (i3, i4) in [(0, 0), (2, 2)] {
            let (s12, inner12) = index.pair_index(icrsh, 0, 0).unwrap();
            let (s34, inner34) = index.pair_index(icrsh, i3, i4).unwrap();
            let w0 = xloc0[&(s12, s34)][[inner12, inner34, 1, 2]];
            let w1 = xloc1[&(s12, s34)][[inner12, inner34, 1, 2]];
            // 1 - (-0.5i)^2
            approx::assert_abs_diff_eq!(w0.re, 1.25, epsilon = 1e-12);
            approx::assert_abs_diff_eq!(w1.re, 2.0, epsilon = 1e-12);
        }
    }

    // gamma0 only for the representative shells 0 and 1
    let gamma0 = bse.load_gamma0().unwrap();
    assert!(!gamma0.is_empty());
    let shell2 = index.pair_index(2, 0, 0).unwrap().0;
    assert!(gamma0.keys().all(|&(b12, b34)| b12 != shell2 && b34 != shell2));
}

#[test]
fn check_mode_accepts_saved_metadata_and_rejects_other_beta() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("dmft_bse.h5");
    let open = || DirArchive::open(&root).unwrap();
    SaveBse::new(open(), BseInfo::Save, 2, 4, false, false, BETA, &spins(), "").unwrap();
    assert!(SaveBse::new(open(), BseInfo::Check, 2, 4, false, false, BETA, &spins(), "").is_ok());
    let err = SaveBse::new(open(), BseInfo::Check, 2, 4, false, false, BETA * 1.01, &spins(), "");
    assert!(matches!(err, Err(BseError::MetadataMismatch { .. })));
}

#[test]
fn heterogeneous_flavors_fail_before_any_solver() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let input_file = write_inputs(tmp.path(), &dmft(&[2, 2, 3], vec![0, 1, 2]), "");
    let config = BseConfig::load(&input_file).unwrap();
    let dmft = DmftSolution::load(tmp.path().join("square.out.json")).unwrap();
    let solver = DmftBseSolver::new(config, dmft, 1, collaborators(3, &log)).unwrap();
    match solver.calc_bse_xloc() {
        Err(BseError::HeterogeneousFlavors(n)) => assert_eq!(n, vec![4, 4, 6]),
        other => panic!("expected HeterogeneousFlavors, got {:?}", other),
    }
    assert_eq!(log.borrow().constructed, 0);
}

#[test]
fn skip_xloc_still_writes_gamma0() {
    let _lock = cwd_lock();
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let input_file = write_inputs(tmp.path(), &dmft(&[2, 2], vec![0, 1]), "skip_Xloc = true");

    let stages = dcore_bse(&input_file, 1, collaborators(2, &log)).unwrap();
    assert_eq!(stages, vec![ShellStage::NotStarted; 2]);
    assert_eq!(log.borrow().constructed, 0);

    let archive = DirArchive::open(tmp.path().join("dmft_bse.h5")).unwrap();
    assert!(!archive.get_blocks("gamma0").unwrap().is_empty());
    assert!(archive.get_blocks("X_loc/0").unwrap().is_empty());
}

#[test]
fn existing_x0q_output_is_not_recomputed() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Log::default();
    let input_file = write_inputs(tmp.path(), &dmft(&[2, 2], vec![0, 1]), "skip_X0q_if_exists = true");
    fs::create_dir_all(tmp.path().join("dmft_bse.h5")).unwrap();
    let config = BseConfig::load(&input_file).unwrap();
    let dmft = DmftSolution::load(tmp.path().join("square.out.json")).unwrap();
    let solver = DmftBseSolver::new(config, dmft, 1, collaborators(2, &log)).unwrap();
    assert!(!solver.calc_bse_x0q().unwrap());
    assert!(log.borrow().sumk.is_empty());
}

#[test]
fn zero_iterations_is_fatal() {
    let log = Log::default();
    let mut dmft = dmft(&[2, 2], vec![0, 1]);
    dmft.iteration_number = 0;
    let config = BseConfig::from_toml("[model]\nseedname = \"square\"\n[impurity_solver]\nname = \"fake\"\n").unwrap();
    let res = DmftBseSolver::new(config, dmft, 1, collaborators(2, &log));
    assert!(matches!(res, Err(BseError::NoCompletedIterations)));
}

//! The external CFD solver as a forecast model. Every member owns
//! `<work_dir>/member_NNN`, seeded from the case template; a forecast writes
//! the member's fields into the start-time directory, points
//! `system/controlDict` at the step, runs the solver there and reads the
//! fields back from the end-time directory.

use nd::{ArrayViewMut, Ix2};
use tracing::{debug, trace, warn};

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use na_core::{Cancellation, ForecastStep, Model, ModelError};

use crate::fields::{parse_field, render_field, time_name};

const POLL: Duration = Duration::from_millis(20);
const LOG_TAIL: usize = 2000;

#[derive(Debug, Clone)]
pub struct ExternalSolver {
  command: PathBuf,
  args: Vec<String>,
  /// Solver name written as `application` into controlDict.
  application: String,
  case_template: Option<PathBuf>,
  work_dir: PathBuf,
  variables: Vec<String>,
  /// Field files of the template's initial time directory, by variable.
  field_templates: HashMap<String, String>,
  cancel: Cancellation,
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
  fs::create_dir_all(to)?;
  for entry in fs::read_dir(from)? {
    let entry = entry?;
    let dest = to.join(entry.file_name());
    if entry.file_type()?.is_dir() {
      copy_dir(&entry.path(), &dest)?;
    } else {
      fs::copy(entry.path(), &dest)?;
    }
  }
  Ok(())
}

fn control_dict(application: &str, step: &ForecastStep) -> String {
  format!("FoamFile
{{
    version     2.0;
    format      ascii;
    class       dictionary;
    location    \"system\";
    object      controlDict;
}}

application     {app};
startFrom       startTime;
startTime       {start};
stopAt          endTime;
endTime         {end};
deltaT          {dt};
writeControl    runTime;
writeInterval   {dt};
purgeWrite      0;
writeFormat     ascii;
writePrecision  17;
timeFormat      general;
timePrecision   9;
runTimeModifiable false;
",
          app = application,
          start = time_name(step.time),
          end = time_name(step.end_time()),
          dt = step.dt)
}

fn log_tail(path: &Path) -> String {
  match fs::read_to_string(path) {
    Ok(s) => {
      let cut = s.len().saturating_sub(LOG_TAIL);
      let cut = (cut..s.len()).find(|&i| s.is_char_boundary(i) ).unwrap_or(s.len());
      s[cut..].to_string()
    },
    Err(_) => String::new(),
  }
}

impl ExternalSolver {
  pub fn new(command: PathBuf, args: Vec<String>, application: String,
             case_template: Option<PathBuf>, work_dir: PathBuf,
             variables: Vec<String>, cancel: Cancellation)
    -> Result<ExternalSolver, ModelError>
  {
    let mut field_templates = HashMap::new();
    if let Some(ref template) = case_template {
      for name in variables.iter() {
        let path = template.join("0").join(name);
        if path.is_file() {
          let text = fs::read_to_string(&path)
            .map_err(|e| ModelError::io(&path, e) )?;
          field_templates.insert(name.clone(), text);
        }
      }
    }
    fs::create_dir_all(&work_dir)
      .map_err(|e| ModelError::io(&work_dir, e) )?;

    Ok(ExternalSolver {
      command,
      args,
      application,
      case_template,
      work_dir,
      variables,
      field_templates,
      cancel,
    })
  }

  pub fn member_dir(&self, member: usize) -> PathBuf {
    self.work_dir.join(format!("member_{:03}", member))
  }

  fn prepare(&self, dir: &Path, step: &ForecastStep,
             state: &ArrayViewMut<f64, Ix2>) -> Result<(), ModelError> {
    let system = dir.join("system");
    if !system.is_dir() {
      if let Some(ref template) = self.case_template {
        trace!(dir = %dir.display(), "seeding member directory from template");
        copy_dir(template, dir).map_err(|e| ModelError::io(dir, e) )?;
      }
      fs::create_dir_all(&system).map_err(|e| ModelError::io(&system, e) )?;
    }

    let control = system.join("controlDict");
    fs::write(&control, control_dict(&self.application, step))
      .map_err(|e| ModelError::io(&control, e) )?;

    let start_dir = dir.join(time_name(step.time));
    fs::create_dir_all(&start_dir).map_err(|e| ModelError::io(&start_dir, e) )?;
    let end_dir = dir.join(time_name(step.end_time()));
    if end_dir != start_dir && end_dir.exists() {
      // a stale result must not be mistaken for this run's output
      fs::remove_dir_all(&end_dir).map_err(|e| ModelError::io(&end_dir, e) )?;
    }

    for (name, row) in self.variables.iter().zip(state.rows()) {
      let text = render_field(name, row,
                              self.field_templates.get(name).map(|s| s.as_str() ))
        .map_err(|e| ModelError::Malformed {
          variable: name.clone(),
          reason: format!("case template field: {}", e),
        })?;
      let path = start_dir.join(name);
      fs::write(&path, text).map_err(|e| ModelError::io(&path, e) )?;
    }
    Ok(())
  }

  /// Runs the solver in `dir`, killing it if the run is cancelled.
  fn execute(&self, dir: &Path) -> Result<(), ModelError> {
    let log = dir.join("solver.log");
    let out = File::create(&log).map_err(|e| ModelError::io(&log, e) )?;
    let err = out.try_clone().map_err(|e| ModelError::io(&log, e) )?;

    let mut child = Command::new(&self.command)
      .args(&self.args)
      .current_dir(dir)
      .stdin(Stdio::null())
      .stdout(Stdio::from(out))
      .stderr(Stdio::from(err))
      .spawn()
      .map_err(|e| ModelError::io(&self.command, e) )?;

    let status = loop {
      if self.cancel.is_cancelled() {
        warn!(dir = %dir.display(), "cancelled, killing solver");
        let _ = child.kill();
        let _ = child.wait();
        return Err(ModelError::Cancelled);
      }
      match child.try_wait().map_err(|e| ModelError::io(&self.command, e) )? {
        Some(status) => break status,
        None => thread::sleep(POLL),
      }
    };

    if !status.success() {
      return Err(ModelError::Process {
        status: status.to_string(),
        stderr: log_tail(&log),
      });
    }
    Ok(())
  }

  fn collect(&self, dir: &Path, step: &ForecastStep,
             state: &mut ArrayViewMut<f64, Ix2>) -> Result<(), ModelError> {
    let end_dir = dir.join(time_name(step.end_time()));
    let cells = state.ncols();
    for (name, mut row) in self.variables.iter().zip(state.rows_mut()) {
      let path = end_dir.join(name);
      let text = fs::read_to_string(&path).map_err(|e| ModelError::io(&path, e) )?;
      let values = parse_field(&text, cells)
        .map_err(|e| ModelError::Malformed {
          variable: name.clone(),
          reason: e.to_string(),
        })?;
      for (dst, v) in row.iter_mut().zip(values.into_iter()) {
        *dst = v;
      }
    }
    Ok(())
  }
}

impl Model for ExternalSolver {
  fn run_model(&self, step: &ForecastStep, member: usize,
               mut state: ArrayViewMut<f64, Ix2>) -> na_core::Result<()> {
    if state.nrows() != self.variables.len() {
      return Err(ModelError::Dimension {
        what: "solver state variables",
        expected: self.variables.len(),
        found: state.nrows(),
      });
    }

    let dir = self.member_dir(member);
    self.prepare(&dir, step, &state)?;
    debug!(member, cycle = step.cycle, sub_step = step.sub_step,
           dir = %dir.display(), "running solver");
    self.execute(&dir)?;
    self.collect(&dir, step, &mut state)
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use nd::{arr2, Array2};

  fn step() -> ForecastStep {
    ForecastStep { cycle: 1, sub_step: 0, time: 0.0, dt: 1.0, }
  }

  fn solver(dir: &Path, script: &str, template: Option<PathBuf>) -> ExternalSolver {
    ExternalSolver::new("sh".into(),
                        vec!["-c".into(), script.into()],
                        "laplacianFoam".into(),
                        template,
                        dir.join("work"),
                        vec!["T".into()],
                        Cancellation::new())
      .unwrap()
  }

  #[test]
  fn round_trip_through_a_fake_solver() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    // "solve" by copying the start fields to the end time
    let s = solver(tmp.path(), "mkdir -p 1 && cp 0/T 1/T", None);
    let mut state = arr2(&[[300.0, 301.5, 302.25]]);
    s.run_model(&step(), 4, state.view_mut()).unwrap();
    assert_eq!(state, arr2(&[[300.0, 301.5, 302.25]]));

    let dir = s.member_dir(4);
    assert!(dir.ends_with("member_004"));
    let control = fs::read_to_string(dir.join("system/controlDict")).unwrap();
    assert!(control.contains("application     laplacianFoam;"));
    assert!(control.contains("endTime         1;"));
  }

  #[test]
  fn template_is_copied_and_its_fields_reused() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let template = tmp.path().join("case");
    fs::create_dir_all(template.join("0")).unwrap();
    fs::create_dir_all(template.join("constant")).unwrap();
    fs::write(template.join("constant/transportProperties"), "DT 1e-5;\n").unwrap();
    fs::write(template.join("0/T"),
              "internalField uniform 0;\nboundaryField\n{\n    left { type fixedValue; value uniform 300; }\n}\n")
      .unwrap();

    let s = solver(tmp.path(), "mkdir -p 1 && cp 0/T 1/T", Some(template));
    let mut state = Array2::from_elem((1, 2), 310.0);
    s.run_model(&step(), 0, state.view_mut()).unwrap();

    let dir = s.member_dir(0);
    assert!(dir.join("constant/transportProperties").is_file());
    let written = fs::read_to_string(dir.join("0/T")).unwrap();
    assert!(written.contains("type fixedValue"));
    assert_eq!(state, Array2::from_elem((1, 2), 310.0));
  }

  #[test]
  fn failing_solver_reports_status_and_log() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let s = solver(tmp.path(), "echo 'floating point exception' >&2; exit 3", None);
    let mut state = Array2::from_elem((1, 2), 300.0);
    match s.run_model(&step(), 0, state.view_mut()) {
      Err(ModelError::Process { stderr, .. }) => {
        assert!(stderr.contains("floating point exception"));
      },
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn garbage_output_is_malformed() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let s = solver(tmp.path(), "mkdir -p 1 && echo 'internalField uniform oops;' > 1/T", None);
    let mut state = Array2::from_elem((1, 2), 300.0);
    let err = s.run_model(&step(), 0, state.view_mut()).unwrap_err();
    assert!(matches!(err, ModelError::Malformed { ref variable, .. } if variable == "T"));
  }

  #[test]
  fn missing_output_is_an_io_error() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let s = solver(tmp.path(), "true", None);
    let mut state = Array2::from_elem((1, 2), 300.0);
    let err = s.run_model(&step(), 0, state.view_mut()).unwrap_err();
    assert!(matches!(err, ModelError::Io { .. }));
  }

  #[test]
  fn cancellation_kills_the_solver() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let s = solver(tmp.path(), "sleep 30", None);
    s.cancel.cancel();
    let mut state = Array2::from_elem((1, 2), 300.0);
    let err = s.run_model(&step(), 0, state.view_mut()).unwrap_err();
    assert!(matches!(err, ModelError::Cancelled));
  }
}

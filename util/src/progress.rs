
use std::borrow::Cow;
use std::io::Stdout;
use std::time::Duration;

use pbr::ProgressBar;

use na_df::CycleReport;

/// Terminal progress over assimilation cycles. Feed it every
/// `CycleReport`; the bar finishes itself after the last cycle.
pub struct CycleProgress {
  name: Cow<'static, str>,
  progress: ProgressBar<Stdout>,
  total: u64,
  skipped: usize,
}

impl CycleProgress {
  pub fn new<N>(total: u64, name: N) -> CycleProgress
    where N: Into<Cow<'static, str>>,
  {
    let name = name.into();
    let mut p = ProgressBar::new(total);
    p.show_speed = false;
    p.show_percent = true;
    p.show_counter = true;
    p.show_time_left = true;

    let fps = Duration::new(1, 0) / 60;
    p.set_max_refresh_rate(Some(fps));

    let msg = format!("{}: ", name);
    p.message(&msg[..]);
    CycleProgress {
      name,
      progress: p,
      total,
      skipped: 0,
    }
  }

  pub fn on_cycle(&mut self, report: &CycleReport) {
    self.skipped += report.skipped_cells;
    if self.skipped > 0 {
      let msg = format!("{} ({} cells skipped): ", self.name, self.skipped);
      self.progress.message(&msg[..]);
    }
    self.progress.inc();

    if report.cycle >= self.total {
      let msg = format!("{} done!\n", self.name);
      self.progress.finish_println(&msg);
    }
  }
}

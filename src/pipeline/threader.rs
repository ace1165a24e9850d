//! Region splitting and the bounded worker pool.
//!
//! A node's requested region is cut into disjoint pieces, each piece gets
//! its own windows into the output buffers, and the pieces are fed through a
//! crossbeam channel to a scoped pool of OS threads. The coordinator collects
//! one result per piece; leaving the scope is the barrier that makes the
//! outputs observable.

use crate::pipeline::context::OutputChunk;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::Threading;
use crate::region::Region;
use crossbeam_channel::unbounded;

/// One unit of work: a piece of the first output plus every output's window.
pub struct Job<'a> {
    pub region: Region,
    pub outputs: Vec<OutputChunk<'a>>,
}

/// Splits regions and runs pieces across worker threads.
#[derive(Debug, Clone, Copy)]
pub struct Threader {
    threads: usize,
    min_piece_extent: usize,
}

impl Threader {
    /// `threads = None` uses the available hardware parallelism.
    pub fn new(threads: Option<usize>, min_piece_extent: usize) -> Self {
        let threads = threads
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
            .max(1);
        Self {
            threads,
            min_piece_extent: min_piece_extent.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn min_piece_extent(&self) -> usize {
        self.min_piece_extent
    }

    /// Pieces `region` will be generated in.
    pub fn pieces(&self, region: &Region, threading: Threading) -> Vec<Region> {
        match threading {
            Threading::Whole => vec![*region],
            Threading::Split => region.split(self.threads, self.min_piece_extent),
        }
    }

    /// Run `work` on every job and wait for all of them.
    ///
    /// `on_done(completed, total)` runs on the calling thread after each
    /// piece finishes. The first error is returned once every piece has
    /// completed. A single job runs inline.
    pub fn run<'a, W, P>(&self, jobs: Vec<Job<'a>>, work: W, mut on_done: P) -> PipelineResult<()>
    where
        W: Fn(Job<'a>) -> PipelineResult<()> + Sync,
        P: FnMut(usize, usize),
    {
        let total = jobs.len();
        if total <= 1 {
            for job in jobs {
                work(job)?;
                on_done(1, 1);
            }
            return Ok(());
        }

        let workers = self.threads.min(total);
        let (job_tx, job_rx) = unbounded::<Job<'a>>();
        let (result_tx, result_rx) = unbounded::<PipelineResult<()>>();
        for job in jobs {
            job_tx.send(job).map_err(|_| PipelineError::Channel)?;
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let work = &work;
                scope.spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        if result_tx.send(work(job)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            let mut first_error = None;
            for completed in 1..=total {
                match result_rx.recv() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        first_error.get_or_insert(e);
                    }
                    Err(_) => return Err(PipelineError::Channel),
                }
                on_done(completed, total);
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

impl Default for Threader {
    fn default() -> Self {
        Self::new(None, 1)
    }
}

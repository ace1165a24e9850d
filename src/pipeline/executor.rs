//! Pipeline arena and the demand-driven update protocol.
//!
//! `update(terminal)` runs in four steps over the terminal's upstream
//! subgraph:
//! 1. Information pass in topological order. Each output learns its largest
//!    possible region and its pipeline time (newest modification upstream).
//!    Nodes whose pipeline time has not moved since their last pass are
//!    skipped.
//! 2. Region pass in reverse topological order. Requests from every consumer
//!    of a shared data object are unioned before its producer runs; sweeps
//!    repeat until no requested region changes.
//! 3. Forward pass from the terminal. A node descends into its producers
//!    only if it must itself re-execute, so up-to-date subgraphs are never
//!    walked.
//! 4. Execution: the output region is split across the worker pool and
//!    `generate_data` runs once per piece.
//!
//! Data objects that are not outputs of this pipeline (external images,
//! disconnected results, outputs of other pipelines) are leaves: they are
//! validated but never regenerated.

use crate::config::EngineConfig;
use crate::image::ImageInfo;
use crate::pipeline::context::{InformationContext, InputView, OutputChunk, RegionContext, RegionRequest};
use crate::pipeline::data_object::{DataHandle, DataObject, DataState};
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::{NodeId, PipelineId, SourceLink};
use crate::pipeline::node::{AnyNode, ConfigValue, Threading};
use crate::pipeline::port::{self, PortDescriptor, PortDirection};
use crate::pipeline::progress::{ProgressReporter, ScopeHandle};
use crate::pipeline::stamp::Stamp;
use crate::pipeline::threader::{Job, Threader};
use crate::region::Region;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

/// Counters describing one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub executed_nodes: usize,
    pub generate_data_calls: usize,
    pub information_calls: usize,
    pub region_sweeps: usize,
}

/// A slot holding a node and its bound data objects.
struct NodeSlot {
    node: AnyNode,
    inputs: Vec<Option<DataHandle>>,
    outputs: Vec<DataHandle>,
    modified: Stamp,
    /// Pipeline time at the last information pass.
    information_time: Stamp,
    progress: Option<ScopeHandle>,
    executions: usize,
    /// Whether this node has been removed (slot is empty).
    deleted: bool,
}

/// Per-update bookkeeping for the forward pass.
struct ForwardState {
    /// Region each node asked of each of its inputs.
    demand: Vec<Vec<Option<Region>>>,
    in_order: Vec<bool>,
    visited: Vec<bool>,
    done: Vec<bool>,
}

/// Node arena plus the update engine.
pub struct Pipeline {
    id: PipelineId,
    nodes: Vec<NodeSlot>,
    threader: Threader,
}

impl Pipeline {
    pub fn new(threader: Threader) -> Self {
        Self {
            id: PipelineId::next(),
            nodes: Vec::new(),
            threader,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Threader::new(config.threads, config.min_piece_extent))
    }

    pub fn id(&self) -> PipelineId {
        self.id
    }

    pub fn threader(&self) -> &Threader {
        &self.threader
    }

    // ── Graph building ──

    /// Add a node to the pipeline. Returns its NodeId.
    pub fn add_node(&mut self, node: impl Into<AnyNode>) -> NodeId {
        let node = node.into();
        let id = NodeId(self.nodes.len() as u32);
        let outputs = port::outputs(node.ports())
            .enumerate()
            .map(|(port, desc)| {
                DataObject::new_output(
                    desc.kind,
                    SourceLink {
                        pipeline: self.id,
                        node: id,
                        port,
                    },
                )
            })
            .collect();
        let inputs = vec![None; port::inputs(node.ports()).count()];
        tracing::debug!("Added node {:?} '{}'", id, node.name());
        self.nodes.push(NodeSlot {
            node,
            inputs,
            outputs,
            modified: Stamp::next(),
            information_time: Stamp::ZERO,
            progress: None,
            executions: 0,
            deleted: false,
        });
        id
    }

    /// Remove a node. Its outputs are frozen in place so consumers holding
    /// them keep a valid, immutable buffer.
    pub fn remove_node(&mut self, id: NodeId) -> PipelineResult<()> {
        let slot = self.slot_mut(id)?;
        for output in slot.outputs.drain(..) {
            output.mark_disconnected();
        }
        slot.inputs.clear();
        slot.progress = None;
        slot.deleted = true;
        tracing::debug!("Removed node {:?}", id);
        Ok(())
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| !s.deleted).count()
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&AnyNode> {
        Ok(&self.slot(id)?.node)
    }

    /// Output data object of `node` named `port`.
    pub fn output(&self, node: NodeId, port: &str) -> PipelineResult<DataHandle> {
        let slot = self.slot(node)?;
        let index = Self::port_index(node, slot.node.ports(), PortDirection::Output, port)?;
        Ok(slot.outputs[index].clone())
    }

    /// Data object currently bound to input `port` of `node`.
    pub fn input(&self, node: NodeId, port: &str) -> PipelineResult<Option<DataHandle>> {
        let slot = self.slot(node)?;
        let index = Self::port_index(node, slot.node.ports(), PortDirection::Input, port)?;
        Ok(slot.inputs[index].clone())
    }

    /// Bind output `from_port` of `from` to input `to_port` of `to`.
    pub fn connect(&mut self, from: NodeId, from_port: &str, to: NodeId, to_port: &str) -> PipelineResult<()> {
        let handle = self.output(from, from_port)?;
        self.set_input(to, to_port, handle)?;
        tracing::debug!("Connected {:?}.{} -> {:?}.{}", from, from_port, to, to_port);
        Ok(())
    }

    /// Bind any data object to input `port` of `node` and mark the node
    /// modified.
    pub fn set_input(&mut self, node: NodeId, port: &str, data: DataHandle) -> PipelineResult<()> {
        let slot = self.slot(node)?;
        let ports = slot.node.ports();
        let index = Self::port_index(node, ports, PortDirection::Input, port)?;
        let expected = port::inputs(ports)
            .nth(index)
            .map(|p| p.kind)
            .ok_or_else(|| PipelineError::UnknownPort {
                node,
                direction: PortDirection::Input.as_str(),
                name: port.to_string(),
            })?;
        if data.kind() != expected {
            return Err(PipelineError::PortMismatch(format!(
                "input '{}' of '{}' expects {:?} pixels, got {:?}",
                port,
                slot.node.name(),
                expected,
                data.kind()
            )));
        }
        if let Some((producer, _)) = self.producer_of(&data) {
            if producer == node.index() {
                return Err(PipelineError::InvalidEdge(format!(
                    "cannot connect {:?} to itself",
                    node
                )));
            }
            if self.would_create_cycle(NodeId(producer as u32), node) {
                return Err(PipelineError::CycleDetected);
            }
        }

        let slot = self.slot_mut(node)?;
        slot.inputs[index] = Some(data);
        slot.modified = Stamp::next();
        Ok(())
    }

    /// Sever `data` from its producer.
    ///
    /// The producer gets a fresh output object; `data` keeps its buffer,
    /// becomes a leaf and is returned for the caller to own.
    pub fn disconnect(&mut self, data: &DataHandle) -> PipelineResult<DataHandle> {
        if data.is_disconnected() {
            return Err(PipelineError::StaleDisconnectedObject);
        }
        let (node, port) = self.producer_of(data).ok_or_else(|| {
            PipelineError::InvalidEdge("data object is not an output of this pipeline".into())
        })?;
        let fresh = DataObject::new_output(
            data.kind(),
            SourceLink {
                pipeline: self.id,
                node: NodeId(node as u32),
                port,
            },
        );
        fresh.set_release_data_flag(data.read_state().release_data);
        self.nodes[node].outputs[port] = fresh;
        data.mark_disconnected();
        tracing::trace!("Disconnected output {} of {:?}", port, NodeId(node as u32));
        Ok(data.clone())
    }

    /// Mark `node` modified so the next update re-executes it and everything
    /// downstream.
    pub fn modified(&mut self, node: NodeId) -> PipelineResult<()> {
        self.slot_mut(node)?.modified = Stamp::next();
        Ok(())
    }

    pub fn modified_time(&self, node: NodeId) -> PipelineResult<Stamp> {
        Ok(self.slot(node)?.modified)
    }

    /// Forward a parameter change to the node. Returns whether it was
    /// recognised; recognised changes mark the node modified.
    pub fn set_parameter(&mut self, node: NodeId, key: &str, value: ConfigValue) -> PipelineResult<bool> {
        let slot = self.slot_mut(node)?;
        let recognised = slot.node.on_config_change(key, &value);
        if recognised {
            slot.modified = Stamp::next();
        } else {
            tracing::warn!("Node '{}' ignored parameter '{}'", slot.node.name(), key);
        }
        Ok(recognised)
    }

    /// Set the requested region of an output. Validated against the largest
    /// possible region once that is known.
    pub fn set_requested_region(&self, node: NodeId, port: &str, region: Region) -> PipelineResult<()> {
        self.output(node, port)?.set_requested_region(region)
    }

    /// Free the output's buffer as soon as its consumers have run.
    pub fn set_release_data(&self, node: NodeId, port: &str, release: bool) -> PipelineResult<()> {
        self.output(node, port)?.set_release_data_flag(release);
        Ok(())
    }

    /// Report this node's execution progress to `scope`.
    pub fn set_progress_scope(&mut self, node: NodeId, scope: ScopeHandle) -> PipelineResult<()> {
        self.slot_mut(node)?.progress = Some(scope);
        Ok(())
    }

    /// Number of times `node` has executed.
    pub fn execution_count(&self, node: NodeId) -> PipelineResult<usize> {
        Ok(self.slot(node)?.executions)
    }

    // ── Update entry points ──

    /// Bring the outputs of `terminal` up to date for their requested
    /// regions (the largest possible region if none was ever set).
    pub fn update(&mut self, terminal: NodeId) -> PipelineResult<UpdateStats> {
        self.run_update(terminal, false)
    }

    /// Request the largest possible region on every output of `terminal`,
    /// then update.
    pub fn update_largest_possible_region(&mut self, terminal: NodeId) -> PipelineResult<UpdateStats> {
        self.run_update(terminal, true)
    }

    /// Update whichever node of this pipeline produces `data`.
    pub fn update_data(&mut self, data: &DataHandle) -> PipelineResult<UpdateStats> {
        if data.is_disconnected() {
            return Err(PipelineError::StaleDisconnectedObject);
        }
        if data.source().is_none() {
            return Ok(UpdateStats::default());
        }
        match self.producer_of(data) {
            Some((node, _)) => self.update(NodeId(node as u32)),
            None => Err(PipelineError::InvalidEdge(
                "data object is not an output of this pipeline".into(),
            )),
        }
    }

    fn run_update(&mut self, terminal: NodeId, largest: bool) -> PipelineResult<UpdateStats> {
        self.slot(terminal)?;
        let mut stats = UpdateStats::default();
        let order = self.upstream_order(terminal)?;

        self.propagate_information(&order, &mut stats)?;

        for output in &self.nodes[terminal.index()].outputs {
            if largest || output.requested_region().is_none() {
                output.set_requested_region_to_largest();
            }
        }
        let demand = self.propagate_requested_regions(&order, &mut stats)?;

        let n = self.nodes.len();
        let mut in_order = vec![false; n];
        for &idx in &order {
            in_order[idx] = true;
        }
        let mut state = ForwardState {
            demand,
            in_order,
            visited: vec![false; n],
            done: vec![false; n],
        };
        self.bring_up_to_date(terminal.index(), &mut state, &mut stats)?;

        tracing::trace!(
            "Update of {:?}: {} executed, {} generate calls, {} sweeps",
            terminal,
            stats.executed_nodes,
            stats.generate_data_calls,
            stats.region_sweeps
        );
        Ok(stats)
    }

    // ── Information pass ──

    fn propagate_information(&mut self, order: &[usize], stats: &mut UpdateStats) -> PipelineResult<()> {
        for &idx in order {
            let id = NodeId(idx as u32);
            let slot = &self.nodes[idx];
            let input_ports: Vec<&PortDescriptor> = port::inputs(slot.node.ports()).collect();

            let mut mtime = slot.modified;
            let mut infos = Vec::with_capacity(slot.inputs.len());
            for (input, desc) in slot.inputs.iter().zip(&input_ports) {
                match input {
                    Some(data) => {
                        let state = data.read_state();
                        mtime = mtime.max(state.pipeline_mtime);
                        infos.push(state.info);
                    }
                    None if desc.optional => infos.push(None),
                    None => {
                        return Err(PipelineError::UnsatisfiedInput {
                            node: id,
                            port: desc.name,
                            reason: "not connected".into(),
                        })
                    }
                }
            }

            if mtime > slot.information_time {
                let ctx = InformationContext { node: id, inputs: &infos };
                let out_infos = slot.node.generate_output_information(&ctx)?;
                if out_infos.len() != slot.outputs.len() {
                    return Err(PipelineError::Node {
                        node_id: id,
                        message: format!(
                            "produced information for {} outputs, declares {}",
                            out_infos.len(),
                            slot.outputs.len()
                        ),
                    });
                }
                for (output, info) in slot.outputs.iter().zip(out_infos) {
                    output.write_state().info = Some(info);
                }
                stats.information_calls += 1;
                self.nodes[idx].information_time = mtime;
            }
            for output in &self.nodes[idx].outputs {
                output.write_state().pipeline_mtime = mtime;
            }
        }
        Ok(())
    }

    // ── Region pass ──

    fn propagate_requested_regions(
        &self,
        order: &[usize],
        stats: &mut UpdateStats,
    ) -> PipelineResult<Vec<Vec<Option<Region>>>> {
        let n = self.nodes.len();
        let mut previous: Vec<Vec<Region>> = vec![Vec::new(); n];
        for &idx in order {
            previous[idx] = self.nodes[idx]
                .outputs
                .iter()
                .map(|o| {
                    let state = o.read_state();
                    state
                        .requested
                        .unwrap_or_else(|| Region::empty(state.largest().map_or(0, |l| l.dim())))
                })
                .collect();
        }

        let bound = order.len() + 1;
        let mut last = None;
        for sweep in 1..=bound {
            stats.region_sweeps = sweep;
            let (requested, demand) = self.region_sweep(order)?;
            let converged = requested == previous;
            previous = requested;
            last = Some(demand);
            if converged {
                break;
            }
            if sweep == bound {
                tracing::warn!(
                    "Requested regions did not reach a fixed point within {} sweeps",
                    bound
                );
            }
        }

        for &idx in order {
            for (output, region) in self.nodes[idx].outputs.iter().zip(&previous[idx]) {
                output.write_state().requested = Some(*region);
            }
        }
        Ok(last.unwrap_or_else(|| vec![Vec::new(); n]))
    }

    /// One reverse-topological sweep. Returns each node's output requests
    /// and each node's requests of its inputs.
    #[allow(clippy::type_complexity)]
    fn region_sweep(&self, order: &[usize]) -> PipelineResult<(Vec<Vec<Region>>, Vec<Vec<Option<Region>>>)> {
        let n = self.nodes.len();
        let terminal = order.last().copied();
        let mut requested: Vec<Vec<Region>> = vec![Vec::new(); n];
        let mut demand: Vec<Vec<Option<Region>>> = vec![Vec::new(); n];
        let mut output_infos: Vec<Vec<ImageInfo>> = vec![Vec::new(); n];

        for &idx in order {
            let id = NodeId(idx as u32);
            let mut infos = Vec::with_capacity(self.nodes[idx].outputs.len());
            for output in &self.nodes[idx].outputs {
                let state = output.read_state();
                let info = state.info.ok_or_else(|| PipelineError::Node {
                    node_id: id,
                    message: "output information missing after information pass".into(),
                })?;
                requested[idx].push(if Some(idx) == terminal {
                    state.requested.unwrap_or(info.largest)
                } else {
                    Region::empty(info.largest.dim())
                });
                infos.push(info);
            }
            output_infos[idx] = infos;
        }

        for &idx in order.iter().rev() {
            let id = NodeId(idx as u32);
            let slot = &self.nodes[idx];
            let infos = &output_infos[idx];

            let mut out_requested = std::mem::take(&mut requested[idx]);
            slot.node.enlarge_output_requested_region(&mut out_requested, infos);
            for (region, info) in out_requested.iter().zip(infos) {
                if !info.largest.contains(region) {
                    return Err(PipelineError::InvalidRegion {
                        node: Some(id),
                        requested: *region,
                        largest: info.largest,
                    });
                }
            }

            let input_infos: Vec<Option<ImageInfo>> = slot
                .inputs
                .iter()
                .map(|input| input.as_ref().and_then(|d| d.info()))
                .collect();
            let req = RegionRequest {
                node: id,
                outputs: &out_requested,
                output_infos: infos,
                inputs: &input_infos,
            };
            let mut wanted = slot.node.generate_input_requested_region(&req);
            wanted.resize(slot.inputs.len(), None);

            for (input, want) in slot.inputs.iter().zip(&wanted) {
                let (Some(data), Some(want)) = (input, want) else {
                    continue;
                };
                if let Some((producer, port)) = self.producer_of(data) {
                    if let Some(entry) = requested[producer].get_mut(port) {
                        *entry = entry.union(want);
                    }
                }
            }
            demand[idx] = wanted;
            requested[idx] = out_requested;
        }
        Ok((requested, demand))
    }

    // ── Forward pass ──

    fn bring_up_to_date(&mut self, idx: usize, state: &mut ForwardState, stats: &mut UpdateStats) -> PipelineResult<()> {
        if state.visited[idx] {
            return Ok(());
        }
        state.visited[idx] = true;

        if self.needs_execution(idx) {
            let producers: Vec<usize> = self.producers(idx).collect();
            for producer in producers {
                self.bring_up_to_date(producer, state, stats)?;
            }
            let calls = self.execute(idx, &state.demand[idx])?;
            self.nodes[idx].executions += 1;
            stats.executed_nodes += 1;
            stats.generate_data_calls += calls;
            state.done[idx] = true;
            self.release_consumed_inputs(idx, state);
        } else {
            state.done[idx] = true;
        }
        Ok(())
    }

    fn needs_execution(&self, idx: usize) -> bool {
        self.nodes[idx].outputs.iter().any(|output| {
            let state = output.read_state();
            state.released
                || state.buffer.is_none()
                || state.update_time < state.pipeline_mtime
                || state.requested.is_some_and(|r| !state.buffered.contains(&r))
        })
    }

    /// Run `generate_data` over every piece of the node's output. Returns
    /// the number of pieces.
    fn execute(&self, idx: usize, demand: &[Option<Region>]) -> PipelineResult<usize> {
        let id = NodeId(idx as u32);
        let slot = &self.nodes[idx];
        let node = &slot.node;
        let input_ports: Vec<&PortDescriptor> = port::inputs(node.ports()).collect();

        for (i, (input, desc)) in slot.inputs.iter().zip(&input_ports).enumerate() {
            let Some(data) = input else {
                if desc.optional {
                    continue;
                }
                return Err(PipelineError::UnsatisfiedInput {
                    node: id,
                    port: desc.name,
                    reason: "not connected".into(),
                });
            };
            let want = demand.get(i).copied().flatten();
            Self::check_input_coverage(id, desc.name, data, want)?;
        }

        // A data object bound to several inputs is locked once.
        let mut unique: Vec<&DataHandle> = Vec::new();
        let lock_slot: Vec<Option<usize>> = slot
            .inputs
            .iter()
            .map(|input| {
                input.as_ref().map(|data| match unique.iter().position(|u| Arc::ptr_eq(u, data)) {
                    Some(position) => position,
                    None => {
                        unique.push(data);
                        unique.len() - 1
                    }
                })
            })
            .collect();
        let input_guards: Vec<RwLockReadGuard<'_, DataState>> =
            unique.iter().map(|data| data.read_state()).collect();
        let views: Vec<Option<InputView<'_>>> = lock_slot
            .iter()
            .map(|position| {
                let state = &input_guards[(*position)?];
                let buffer = state.buffer.as_ref()?;
                Some(InputView::new(state.buffered, state.info?, buffer))
            })
            .collect();

        let mut output_guards: Vec<RwLockWriteGuard<'_, DataState>> =
            slot.outputs.iter().map(|data| data.write_state()).collect();
        let mut regions = Vec::with_capacity(output_guards.len());
        let mut output_infos = Vec::with_capacity(output_guards.len());
        for guard in output_guards.iter_mut() {
            let info = guard.info.ok_or_else(|| PipelineError::Node {
                node_id: id,
                message: "output information missing".into(),
            })?;
            let region = guard.requested.unwrap_or(info.largest);
            guard.allocate(region);
            regions.push(region);
            output_infos.push(info);
        }

        let uniform = regions.windows(2).all(|w| w[0] == w[1]);
        let threading = if uniform { node.threading() } else { Threading::Whole };
        let first = regions.first().copied().unwrap_or_default();
        let pieces = self.threader.pieces(&first, threading);
        tracing::trace!(
            "Executing {:?} '{}' over {} in {} piece(s)",
            id,
            node.name(),
            first,
            pieces.len()
        );

        let jobs = {
            let lengths: Vec<usize> = pieces.iter().map(Region::num_elements).collect();
            let mut windows = Vec::with_capacity(output_guards.len());
            for guard in output_guards.iter_mut() {
                let buffer = guard.buffer.as_mut().ok_or_else(|| PipelineError::Node {
                    node_id: id,
                    message: "output buffer missing after allocation".into(),
                })?;
                let split = match threading {
                    Threading::Whole => vec![buffer.as_slice_mut()],
                    Threading::Split => buffer.split_mut(&lengths),
                };
                windows.push(split.into_iter());
            }
            let mut jobs = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                let mut outputs = Vec::with_capacity(windows.len());
                for (window, region) in windows.iter_mut().zip(&regions) {
                    let data = window.next().ok_or_else(|| PipelineError::Node {
                        node_id: id,
                        message: "output window missing".into(),
                    })?;
                    let region = match threading {
                        Threading::Whole => *region,
                        Threading::Split => *piece,
                    };
                    outputs.push(OutputChunk { region, data });
                }
                jobs.push(Job {
                    region: *piece,
                    outputs,
                });
            }
            jobs
        };

        let reporter = ProgressReporter::new(slot.progress.clone());
        let threads = self.threader.threads();
        let name = node.name();
        let outcome = self.threader.run(
            jobs,
            |job| {
                let mut ctx = RegionContext {
                    node: id,
                    node_name: name,
                    region: job.region,
                    inputs: &views,
                    outputs: job.outputs,
                    output_infos: &output_infos,
                    threads,
                    progress: reporter.clone(),
                };
                node.generate_data(&mut ctx)
            },
            |done, total| reporter.report(done as f64 / total as f64),
        );
        if let Err(err) = outcome {
            for guard in output_guards.iter_mut() {
                guard.discard();
            }
            tracing::debug!("Discarded partial output of {:?} '{}': {}", id, name, err);
            return Err(err);
        }

        for guard in output_guards.iter_mut() {
            guard.update_time = guard.pipeline_mtime;
        }
        Ok(pieces.len())
    }

    fn check_input_coverage(
        node: NodeId,
        port: &'static str,
        data: &DataHandle,
        want: Option<Region>,
    ) -> PipelineResult<()> {
        let state = data.read_state();
        let Some(want) = want else {
            return Ok(());
        };
        let covered = state.buffered.contains(&want) && (want.is_empty() || state.buffer.is_some());
        if covered {
            return Ok(());
        }
        if state.disconnected {
            return Err(PipelineError::StaleDisconnectedObject);
        }
        Err(PipelineError::UnsatisfiedInput {
            node,
            port,
            reason: format!(
                "buffered {} does not cover requested {}",
                state.buffered, want
            ),
        })
    }

    /// Free inputs flagged for release once every consumer in this update
    /// has finished with them.
    fn release_consumed_inputs(&self, idx: usize, state: &ForwardState) {
        for data in self.nodes[idx].inputs.iter().flatten() {
            if self.producer_of(data).is_none() || !data.read_state().release_data {
                continue;
            }
            let all_done = (0..self.nodes.len())
                .filter(|&c| state.in_order[c] && !self.nodes[c].deleted)
                .filter(|&c| {
                    self.nodes[c]
                        .inputs
                        .iter()
                        .flatten()
                        .any(|i| Arc::ptr_eq(i, data))
                })
                .all(|c| state.done[c]);
            if all_done {
                data.write_state().release();
            }
        }
    }

    // ── Topology ──

    /// Producer node and output port of `data`, if it is a live output of
    /// this pipeline.
    fn producer_of(&self, data: &DataHandle) -> Option<(usize, usize)> {
        let link = data.source()?;
        if link.pipeline != self.id {
            return None;
        }
        let slot = self.nodes.get(link.node.index())?;
        if slot.deleted {
            return None;
        }
        slot.outputs
            .get(link.port)
            .filter(|output| Arc::ptr_eq(output, data))
            .map(|_| (link.node.index(), link.port))
    }

    fn producers(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[idx]
            .inputs
            .iter()
            .flatten()
            .filter_map(|data| self.producer_of(data))
            .map(|(producer, _)| producer)
    }

    /// Topological order (Kahn's algorithm) of `terminal` and everything
    /// upstream of it. The terminal comes last.
    fn upstream_order(&self, terminal: NodeId) -> PipelineResult<Vec<usize>> {
        let n = self.nodes.len();
        let mut in_set = vec![false; n];
        let mut stack = vec![terminal.index()];
        while let Some(idx) = stack.pop() {
            if in_set[idx] {
                continue;
            }
            in_set[idx] = true;
            stack.extend(self.producers(idx));
        }

        let mut in_degree = vec![0u32; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for idx in (0..n).filter(|&i| in_set[i]) {
            for producer in self.producers(idx) {
                adj[producer].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| in_set[i] && in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(node) = queue.pop() {
            order.push(node);
            for &next in &adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        let expected = in_set.iter().filter(|&&b| b).count();
        if order.len() != expected {
            tracing::warn!(
                "Pipeline graph has a cycle! Only {} of {} nodes scheduled.",
                order.len(),
                expected
            );
            return Err(PipelineError::CycleDetected);
        }
        Ok(order)
    }

    /// Check if binding an output of `from` into `to` would create a cycle.
    fn would_create_cycle(&self, from: NodeId, to: NodeId) -> bool {
        // If `to` is upstream of `from`, adding from->to closes a loop.
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from.index()];

        while let Some(current) = stack.pop() {
            if current == to.index() {
                return true;
            }
            if current >= self.nodes.len() || visited[current] {
                continue;
            }
            visited[current] = true;
            stack.extend(self.producers(current));
        }
        false
    }

    fn port_index(node: NodeId, ports: &[PortDescriptor], direction: PortDirection, name: &str) -> PipelineResult<usize> {
        port::position(ports, direction, name).ok_or_else(|| PipelineError::UnknownPort {
            node,
            direction: direction.as_str(),
            name: name.to_string(),
        })
    }

    fn slot(&self, id: NodeId) -> PipelineResult<&NodeSlot> {
        self.nodes
            .get(id.index())
            .filter(|s| !s.deleted)
            .ok_or(PipelineError::UnknownNode(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> PipelineResult<&mut NodeSlot> {
        self.nodes
            .get_mut(id.index())
            .filter(|s| !s.deleted)
            .ok_or(PipelineError::UnknownNode(id))
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(Threader::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::pipeline::nodes::{ImageSourceNode, UnaryFunctor, UnaryFunctorNode};

    fn ramp(size: &[usize]) -> Image {
        Image::from_fn(Region::from_size(size), |i| i.iter().sum::<i64>() as f64 - 3.0)
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(Threader::new(Some(2), 1))
    }

    #[test]
    fn test_topological_order_linear() {
        let mut pipeline = pipeline();
        let a = pipeline.add_node(ImageSourceNode::new(ramp(&[4, 4])));
        let b = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        let c = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Scale(2.0)));
        pipeline.connect(a, "output", b, "input").unwrap();
        pipeline.connect(b, "output", c, "input").unwrap();

        let order = pipeline.upstream_order(c).unwrap();
        assert_eq!(order, vec![a.index(), b.index(), c.index()]);
        assert_eq!(pipeline.upstream_order(b).unwrap().len(), 2);
    }

    #[test]
    fn test_topological_order_diamond() {
        use crate::pipeline::nodes::{BinaryArithmeticNode, BinaryOp};

        let mut pipeline = pipeline();
        let a = pipeline.add_node(ImageSourceNode::new(ramp(&[4, 4])));
        let b = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        let c = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Scale(3.0)));
        let d = pipeline.add_node(BinaryArithmeticNode::new(BinaryOp::Multiply));
        pipeline.connect(a, "output", b, "input").unwrap();
        pipeline.connect(a, "output", c, "input").unwrap();
        pipeline.connect(b, "output", d, "input1").unwrap();
        pipeline.connect(c, "output", d, "input2").unwrap();

        let order = pipeline.upstream_order(d).unwrap();
        let pos = |nid: NodeId| order.iter().position(|&x| x == nid.index()).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut pipeline = pipeline();
        let a = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        let b = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        pipeline.connect(a, "output", b, "input").unwrap();
        assert!(matches!(
            pipeline.connect(b, "output", a, "input"),
            Err(PipelineError::CycleDetected)
        ));
        assert!(matches!(
            pipeline.connect(a, "output", a, "input"),
            Err(PipelineError::InvalidEdge(_))
        ));
    }

    #[test]
    fn test_port_validation() {
        use crate::pipeline::nodes::ForwardFftNode;

        let mut pipeline = pipeline();
        let fft = pipeline.add_node(ForwardFftNode::new());
        let abs = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        assert!(matches!(
            pipeline.connect(fft, "output", abs, "input"),
            Err(PipelineError::PortMismatch(_))
        ));
        assert!(matches!(
            pipeline.connect(fft, "nope", abs, "input"),
            Err(PipelineError::UnknownPort { direction: "output", .. })
        ));
        assert!(matches!(
            pipeline.output(NodeId(9), "output"),
            Err(PipelineError::UnknownNode(NodeId(9)))
        ));
    }

    #[test]
    fn test_update_chain_and_idempotence() {
        let mut pipeline = pipeline();
        let src = pipeline.add_node(ImageSourceNode::new(ramp(&[5, 3])));
        let abs = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Abs));
        pipeline.connect(src, "output", abs, "input").unwrap();

        let stats = pipeline.update(abs).unwrap();
        assert_eq!(stats.executed_nodes, 2);
        let out = pipeline.output(abs, "output").unwrap();
        assert_eq!(out.value_at(&[0, 0]), Some(3.0));
        assert_eq!(out.value_at(&[4, 2]), Some(3.0));

        let again = pipeline.update(abs).unwrap();
        assert_eq!(again.executed_nodes, 0);
        assert_eq!(again.generate_data_calls, 0);
        assert_eq!(again.information_calls, 0);
    }

    #[test]
    fn test_parameter_change_reexecutes_downstream_only() {
        let mut pipeline = pipeline();
        let src = pipeline.add_node(ImageSourceNode::new(ramp(&[4, 4])));
        let scale = pipeline.add_node(UnaryFunctorNode::new(UnaryFunctor::Scale(1.0)));
        pipeline.connect(src, "output", scale, "input").unwrap();
        pipeline.update(scale).unwrap();

        assert!(pipeline
            .set_parameter(scale, "factor", ConfigValue::Float(10.0))
            .unwrap());
        assert!(!pipeline
            .set_parameter(scale, "bogus", ConfigValue::Bool(true))
            .unwrap());
        let stats = pipeline.update(scale).unwrap();
        assert_eq!(stats.executed_nodes, 1);
        assert_eq!(pipeline.execution_count(src).unwrap(), 1);
        assert_eq!(pipeline.execution_count(scale).unwrap(), 2);
        let out = pipeline.output(scale, "output").unwrap();
        assert_eq!(out.value_at(&[3, 3]), Some(30.0));
    }

    #[test]
    fn test_disconnect_gives_node_fresh_output() {
        let mut pipeline = pipeline();
        let src = pipeline.add_node(ImageSourceNode::new(ramp(&[3, 3])));
        pipeline.update(src).unwrap();
        let out = pipeline.output(src, "output").unwrap();
        let owned = pipeline.disconnect(&out).unwrap();

        assert!(owned.is_disconnected());
        assert!(!Arc::ptr_eq(&owned, &pipeline.output(src, "output").unwrap()));
        assert!(matches!(
            pipeline.update_data(&owned),
            Err(PipelineError::StaleDisconnectedObject)
        ));
        assert!(matches!(
            pipeline.disconnect(&owned),
            Err(PipelineError::StaleDisconnectedObject)
        ));
    }

    #[test]
    fn test_remove_node_freezes_outputs() {
        let mut pipeline = pipeline();
        let src = pipeline.add_node(ImageSourceNode::new(ramp(&[2, 2])));
        pipeline.update(src).unwrap();
        let out = pipeline.output(src, "output").unwrap();
        pipeline.remove_node(src).unwrap();
        assert_eq!(pipeline.node_count(), 0);
        assert!(out.is_disconnected());
        assert!(matches!(pipeline.update(src), Err(PipelineError::UnknownNode(_))));
    }
}

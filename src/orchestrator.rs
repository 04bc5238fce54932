//! The update orchestrator: drives one poll cycle through
//! `Idle -> CheckingMetadata -> Downloading -> Installing -> Reporting -> Idle`,
//! broadcasting progress on the event bus as it goes. Built on
//! top of the `uptane` verification engine, the `fetcher`, the
//! `SecondaryEcu` collaborator and the local `PackageManager`.

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use serde_json as json;
use std::collections::HashMap;

use datatype::{
    build_manifest, generate_nonce, CycleResult, EcuManifests, EcuSerial, EcuVersion, Error, Event, HardwareIdentifier,
    InstallCode, InstallOutcome, NetworkConfig, PrivateKey, RoleKeys, RoleName, Signed, TargetInfo, Targets, TufImage,
    TufMeta, UptaneConfig, Url, Util,
};
use fetcher;
use http::Transport;
use pacman::PackageManager;
use secondary::{MetadataBundle, RepoBundle, SecondaryEcu};
use store::{DeviceState, MetadataStore};
use uptane::{resolve_plan, update_repository, verify_signed, KeyRing, KnownEcu, PlanEntry, Repo, RepoState};


/// How deep the orchestrator is willing to walk a delegation tree while
/// pre-fetching image-repo targets roles for `resolve_plan`.
const MAX_DELEGATION_DEPTH: u32 = 5;

/// One secondary ECU, paired with the cached identity fields the
/// orchestrator needs without re-querying it every cycle.
struct Secondary {
    serial: EcuSerial,
    hardware_id: HardwareIdentifier,
    ecu: Box<dyn SecondaryEcu>,
}

/// Drives the Uptane update cycle for one device. Holds every
/// collaborator the cycle needs: the transport, the metadata store, the
/// local package manager for the primary ECU, and the known secondaries.
pub struct Orchestrator {
    network: NetworkConfig,
    uptane: UptaneConfig,
    transport: Box<dyn Transport>,
    store: Box<dyn MetadataStore>,
    pacman: Box<dyn PackageManager>,
    secondaries: Vec<Secondary>,
    primary_key: PrivateKey,
    events: Sender<Event>,

    director: RepoState,
    image: RepoState,
    device: DeviceState,
    device_state_path: String,
}

impl Orchestrator {
    pub fn new(
        network: NetworkConfig,
        uptane: UptaneConfig,
        transport: Box<dyn Transport>,
        store: Box<dyn MetadataStore>,
        pacman: Box<dyn PackageManager>,
        primary_key: PrivateKey,
        events: Sender<Event>,
        device_state_path: String,
    ) -> Result<Orchestrator, Error> {
        let device = DeviceState::load(&device_state_path)?;
        Ok(Orchestrator {
            network,
            uptane,
            transport,
            store,
            pacman,
            secondaries: Vec::new(),
            primary_key,
            events,
            director: RepoState::default(),
            image: RepoState::default(),
            device,
            device_state_path,
        })
    }

    /// Register a secondary ECU the orchestrator should push updates to.
    pub fn add_secondary(&mut self, ecu: Box<dyn SecondaryEcu>) {
        let serial = ecu.get_serial();
        let hardware_id = ecu.get_hw_id();
        self.secondaries.push(Secondary { serial, hardware_id, ecu });
    }

    fn emit(&self, event: Event) {
        let _ = self.events.send(event);
    }

    fn known_ecus(&self) -> Vec<KnownEcu> {
        let mut ecus = vec![KnownEcu {
            serial: EcuSerial(self.uptane.primary_ecu_serial.clone()),
            hardware_id: HardwareIdentifier(self.uptane.primary_hardware_id.clone()),
        }];
        ecus.extend(self.secondaries.iter().map(|s| KnownEcu { serial: s.serial.clone(), hardware_id: s.hardware_id.clone() }));
        ecus
    }

    /// Run a single cycle to completion. Never returns an `Err` —
    /// verification, fetch and install failures are reported as the
    /// `CycleResult` and the process carries on to the next tick.
    pub fn run_cycle(&mut self, now: DateTime<Utc>, cancelled: &dyn Fn() -> bool) -> CycleResult {
        match self.checking_metadata(now, cancelled) {
            Ok(Some((plan, director_cache, image_cache))) => {
                let result = self.downloading_and_installing(plan, director_cache, image_cache, cancelled);
                self.reporting(result.clone());
                result
            }
            Ok(None) => {
                let result = CycleResult::Success;
                self.emit(Event::UpdateCheckComplete(result.clone()));
                self.reporting(result.clone());
                result
            }
            Err(err) => {
                let result = CycleResult::Failed(err.to_string());
                self.emit(Event::UpdateCheckComplete(result.clone()));
                self.reporting(result.clone());
                result
            }
        }
    }

    /// `CheckingMetadata`: update both repositories, cross-check targets and
    /// build the install plan. `Ok(None)` means the check succeeded but
    /// there is nothing new to install.
    fn checking_metadata(
        &mut self,
        now: DateTime<Utc>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<Option<(Vec<PlanEntry>, HashMap<RoleName, Vec<u8>>, HashMap<RoleName, Vec<u8>>)>, Error> {
        let director_base = self.uptane.director_server.clone();
        let repo_base = self.uptane.repo_server.clone();

        let mut director_cache = HashMap::new();
        let director_changed = {
            let network = &self.network;
            let transport = &*self.transport;
            let cache = &mut director_cache;
            update_repository(
                Repo::Director,
                &mut self.director,
                |role, version| fetch_role_cached(transport, &director_base, role, version, network, cache, cancelled),
                now,
            )?
        };

        let mut image_cache = HashMap::new();
        let image_changed = {
            let network = &self.network;
            let transport = &*self.transport;
            let cache = &mut image_cache;
            update_repository(
                Repo::Image,
                &mut self.image,
                |role, version| fetch_role_cached(transport, &repo_base, role, version, network, cache, cancelled),
                now,
            )?
        };

        if !director_changed && !image_changed {
            return Ok(None);
        }

        let director_targets = self.director.targets.as_ref().ok_or_else(|| {
            Error::VerifyMalformedDocument("director repository has no targets role".into())
        })?;
        let image_targets = self.image.targets.as_ref().ok_or_else(|| {
            Error::VerifyMalformedDocument("image repository has no targets role".into())
        })?;

        self.fetch_delegations(&repo_base, image_targets, now, cancelled)?;

        let known = self.known_ecus();
        let plan = resolve_plan(director_targets, image_targets, &self.image.delegated, &known, &self.device.installed)?;

        for (repo, cache) in [(Repo::Director, &director_cache), (Repo::Image, &image_cache)] {
            for (role, bytes) in cache.iter() {
                let version = role_version(repo, role, self).unwrap_or(0);
                self.store.put(repo, *role, version, bytes.clone());
            }
        }

        if plan.is_empty() {
            return Ok(None);
        }
        Ok(Some((plan, director_cache, image_cache)))
    }

    /// Fetch and verify any delegated targets roles the image repo's
    /// top-level targets document names, breadth-first and capped at
    /// `MAX_DELEGATION_DEPTH`.
    fn fetch_delegations(
        &mut self,
        repo_base: &Url,
        top: &Targets,
        now: DateTime<Utc>,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<(), Error> {
        let mut frontier = match &top.delegations {
            Some(d) => d.roles.clone(),
            None => return Ok(()),
        };
        let mut parent_keys: HashMap<String, RoleKeys> = frontier
            .iter()
            .map(|role| (role.name.clone(), RoleKeys { keyids: role.keyids.clone(), threshold: role.threshold }))
            .collect();
        let mut parent_pubkeys = match &top.delegations {
            Some(d) => d.keys.clone(),
            None => HashMap::new(),
        };

        let mut depth = 0;
        while !frontier.is_empty() && depth < MAX_DELEGATION_DEPTH {
            let mut next_frontier = Vec::new();
            for role in frontier.drain(..) {
                if cancelled() {
                    return Err(Error::Cancelled);
                }
                if self.image.delegated.contains_key(&role.name) {
                    continue;
                }
                let url = repo_base.join(&format!("{}.json", role.name));
                let raw = fetcher::fetch_role(&*self.transport, &url, RoleName::Targets, &self.network)?;
                let keyring = KeyRing::from_parts(parent_pubkeys.clone(), role.name.clone(), parent_keys[&role.name].clone());
                let targets: Targets = verify_signed(&raw, &keyring, RoleName::Targets, 0, now)?;

                if let Some(d) = &targets.delegations {
                    for child in &d.roles {
                        parent_keys.insert(child.name.clone(), RoleKeys { keyids: child.keyids.clone(), threshold: child.threshold });
                    }
                    parent_pubkeys.extend(d.keys.clone());
                    next_frontier.extend(d.roles.clone());
                }
                self.image.delegated.insert(role.name.clone(), targets);
            }
            frontier = next_frontier;
            depth += 1;
        }
        Ok(())
    }

    /// `Downloading` then `Installing`: fetch every planned target to disk,
    /// then dispatch installs in plan order.
    fn downloading_and_installing(
        &mut self,
        plan: Vec<PlanEntry>,
        director_cache: HashMap<RoleName, Vec<u8>>,
        image_cache: HashMap<RoleName, Vec<u8>>,
        cancelled: &dyn Fn() -> bool,
    ) -> CycleResult {
        let repo_base = self.uptane.repo_server.clone();
        let mut downloaded: Vec<(PlanEntry, String)> = Vec::new();
        let mut any_download_failed = false;

        for entry in &plan {
            if cancelled() {
                any_download_failed = true;
                break;
            }
            let target = TargetInfo { length: entry.length, hashes: entry.hashes.clone(), custom: None };
            let url = repo_base.join(&format!("targets/{}", entry.filepath));
            let dest = format!("{}/targets/{}", self.uptane.metadata_path, entry.filepath.replace('/', "_"));
            let filepath = entry.filepath.clone();

            let result = fetcher::fetch_target(&*self.transport, &url, &dest, &target, &self.network, &mut |written, total| {
                let pct = if total == 0 { 100 } else { ((written * 100) / total).min(100) as u8 };
                self.emit(Event::DownloadProgressReport(filepath.clone(), filepath.clone(), pct));
                !cancelled()
            });

            match result {
                Ok(_) => {
                    self.emit(Event::DownloadTargetComplete(entry.filepath.clone(), true));
                    downloaded.push((entry.clone(), dest));
                }
                Err(_) => {
                    self.emit(Event::DownloadTargetComplete(entry.filepath.clone(), false));
                    any_download_failed = true;
                }
            }
        }

        let download_result =
            if any_download_failed { CycleResult::Failed("one or more targets failed to download".into()) } else { CycleResult::Success };
        self.emit(Event::AllDownloadsComplete(download_result.clone()));

        if let CycleResult::Failed(reason) = download_result {
            return CycleResult::Failed(reason);
        }

        let bundle = match self.build_metadata_bundle(&director_cache, &image_cache) {
            Ok(bundle) => bundle,
            Err(err) => return CycleResult::Failed(err.to_string()),
        };

        let mut any_install_failed = false;
        let mut manifest_entries: HashMap<EcuSerial, InstallOutcome> = HashMap::new();

        for (entry, path) in &downloaded {
            self.emit(Event::InstallStarted(entry.ecu_serial.clone()));
            let outcome = self.install_one(entry, path, &bundle);
            let success = outcome.is_success();
            if !success {
                any_install_failed = true;
            }
            self.emit(Event::InstallTargetComplete(entry.ecu_serial.clone(), success));
            manifest_entries.insert(entry.ecu_serial.clone(), outcome);
        }

        for (serial, outcome) in manifest_entries {
            self.device.installed.entry(serial.clone()).or_insert_with(String::new);
            if outcome.is_success() {
                if let Some(entry) = downloaded.iter().find(|(e, _)| e.ecu_serial == serial) {
                    if let Some(hash) = entry.0.hashes.get("sha256") {
                        self.device.installed.insert(serial, hash.clone());
                    }
                }
            }
        }

        let install_result =
            if any_install_failed { CycleResult::Failed("one or more ECUs failed to install".into()) } else { CycleResult::Success };
        self.emit(Event::AllInstallsComplete(install_result.clone()));
        install_result
    }

    fn install_one(&mut self, entry: &PlanEntry, path: &str, bundle: &MetadataBundle) -> InstallOutcome {
        if entry.ecu_serial.0 == self.uptane.primary_ecu_serial {
            return self.pacman.install(path).unwrap_or_else(|err| {
                InstallOutcome::new(InstallCode::InstallFailed, err.to_string())
            });
        }

        let secondary = match self.secondaries.iter_mut().find(|s| s.serial == entry.ecu_serial) {
            Some(s) => s,
            None => return InstallOutcome::new(InstallCode::InstallFailed, format!("unknown secondary {}", entry.ecu_serial)),
        };

        let target = TargetInfo { length: entry.length, hashes: entry.hashes.clone(), custom: None };
        let blob = match Util::read_file(path) {
            Ok(blob) => blob,
            Err(err) => return InstallOutcome::new(InstallCode::DownloadFailed, err.to_string()),
        };

        if let Err(err) = secondary.ecu.put_metadata(bundle) {
            return InstallOutcome::new(InstallCode::VerificationFailed, err.to_string());
        }
        if let Err(err) = secondary.ecu.put_target(&target, &mut &blob[..]) {
            return InstallOutcome::new(InstallCode::DownloadFailed, err.to_string());
        }
        match secondary.ecu.install(&target) {
            Ok(outcome) => outcome,
            Err(err) => InstallOutcome::new(InstallCode::InstallFailed, err.to_string()),
        }
    }

    fn build_metadata_bundle(
        &self,
        director_cache: &HashMap<RoleName, Vec<u8>>,
        image_cache: &HashMap<RoleName, Vec<u8>>,
    ) -> Result<MetadataBundle, Error> {
        Ok(MetadataBundle {
            director: RepoBundle {
                root: director_cache.get(&RoleName::Root).cloned(),
                timestamp: require_role(director_cache, RoleName::Timestamp)?,
                snapshot: require_role(director_cache, RoleName::Snapshot)?,
                targets: require_role(director_cache, RoleName::Targets)?,
            },
            image: RepoBundle {
                root: image_cache.get(&RoleName::Root).cloned(),
                timestamp: require_role(image_cache, RoleName::Timestamp)?,
                snapshot: require_role(image_cache, RoleName::Snapshot)?,
                targets: require_role(image_cache, RoleName::Targets)?,
            },
        })
    }

    /// `Reporting`: assemble and submit the aggregate manifest, then commit
    /// whatever role documents this cycle fetched.
    fn reporting(&mut self, cycle_result: CycleResult) {
        self.emit(Event::SendDeviceDataComplete);

        let manifest = self.build_manifest_internal();
        let submitted = match manifest.and_then(|signed| self.submit_manifest(&signed)) {
            Ok(()) => true,
            Err(err) => {
                error!("couldn't submit manifest: {}", err);
                false
            }
        };
        self.emit(Event::PutManifestComplete(submitted));

        if let CycleResult::Success = cycle_result {
            if let Err(err) = self.store.commit() {
                error!("couldn't commit metadata store: {}", err);
            }
        }
        if let Err(err) = self.device.save(&self.device_state_path) {
            error!("couldn't persist device state: {}", err);
        }
    }

    fn build_manifest_internal(&mut self) -> Result<Signed<EcuManifests>, Error> {
        let primary_serial = EcuSerial(self.uptane.primary_ecu_serial.clone());
        let hardware_id = HardwareIdentifier(self.uptane.primary_hardware_id.clone());
        let current_hash = self.pacman.get_current().unwrap_or_default();
        let now = Utc::now();

        let mut versions = vec![Signed::sign(
            EcuVersion {
                ecu_serial: primary_serial.clone(),
                hardware_id,
                installed_image: TufImage {
                    filepath: current_hash.clone(),
                    fileinfo: TufMeta { length: 0, hashes: hashmap_with("sha256", &current_hash), version: None },
                },
                previous_timeserver_time: now,
                timeserver_time: now,
                attacks_detected: String::new(),
                custom: None,
                nonce: generate_nonce(),
            },
            &self.primary_key,
        )?];

        for secondary in self.secondaries.iter_mut() {
            let manifest = match secondary.ecu.get_manifest() {
                Ok(manifest) => manifest,
                Err(err) => {
                    error!("{}: couldn't fetch manifest: {}", secondary.serial, err);
                    continue;
                }
            };
            match manifest.verify_with(&secondary.ecu.get_public_key()) {
                Ok(()) => versions.push(manifest),
                Err(err) => error!("{}: dropping manifest with bad signature: {}", secondary.serial, err),
            }
        }

        build_manifest(primary_serial, versions, &self.primary_key)
    }

    fn submit_manifest(&self, manifest: &Signed<EcuManifests>) -> Result<(), Error> {
        let url = self.uptane.director_server.join("manifest");
        let body = json::to_vec(manifest)?;
        let resp = self.transport.put(&url, "application/json", &body)?;
        if !resp.is_ok() {
            return Err(Error::FetchNotFound(format!("manifest submission: HTTP {}", resp.code)));
        }
        Ok(())
    }
}

fn require_role(cache: &HashMap<RoleName, Vec<u8>>, role: RoleName) -> Result<Vec<u8>, Error> {
    cache
        .get(&role)
        .cloned()
        .ok_or_else(|| Error::VerifyMalformedDocument(format!("missing {} in this cycle's fetch cache", role)))
}

fn role_version(repo: Repo, role: &RoleName, orch: &Orchestrator) -> Option<u64> {
    let state = match repo {
        Repo::Director => &orch.director,
        Repo::Image => &orch.image,
    };
    match role {
        RoleName::Root => state.root.as_ref().map(|r| r.version),
        RoleName::Timestamp => state.timestamp.as_ref().map(|t| t.version),
        RoleName::Snapshot => state.snapshot.as_ref().map(|s| s.version),
        RoleName::Targets => state.targets.as_ref().map(|t| t.version),
    }
}

fn hashmap_with(alg: &str, hash: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert(alg.to_string(), hash.to_string());
    map
}

/// Fetch one role document, recording it in `cache` for later use (building
/// secondary bundles, buffering the metadata-store commit), and translating
/// a not-found response into `Ok(None)` so root rotation can detect "no
/// next version".
fn fetch_role_cached(
    transport: &dyn Transport,
    base: &Url,
    role: RoleName,
    version: Option<u64>,
    network: &NetworkConfig,
    cache: &mut HashMap<RoleName, Vec<u8>>,
    cancelled: &dyn Fn() -> bool,
) -> Result<Option<Vec<u8>>, Error> {
    if cancelled() {
        return Err(Error::Cancelled);
    }
    let filename = match (role, version) {
        (RoleName::Root, Some(v)) => format!("{}.root.json", v),
        _ => format!("{}.json", role),
    };
    let url = base.join(&filename);
    match fetcher::fetch_role(transport, &url, role, network) {
        Ok(bytes) => {
            cache.insert(role, bytes.clone());
            Ok(Some(bytes))
        }
        Err(Error::FetchNotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

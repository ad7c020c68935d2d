use async_trait::async_trait;
use harvest_queue::broker::{encode_payload, FETCH_QUEUE, GATHER_QUEUE, JOB_ID_KEY};
use harvest_queue::{
    BrokerConfig, ConnectionFactory, FetchOutcome, GatheredObject, HarvestJob, HarvestObject,
    HarvestPipeline, HarvestSource, HarvestStore, Harvester, HarvesterError, HarvesterInfo,
    HarvesterRegistry, ImportOutcome, JobReport, JobStatus, MemoryStore, ObjectState,
    ReportStatus,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Catalogue harvester: gathers a fixed id list, reports `unchanged` for ids
/// starting with `same-`, fails to fetch ids starting with `bad-`.
struct CatalogueHarvester {
    ids: Mutex<Vec<String>>,
    fail_gather: bool,
}

impl CatalogueHarvester {
    fn new(ids: &[&str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            fail_gather: false,
        }
    }

    fn failing() -> Self {
        Self {
            ids: Mutex::new(Vec::new()),
            fail_gather: true,
        }
    }
}

#[async_trait]
impl Harvester for CatalogueHarvester {
    fn info(&self) -> HarvesterInfo {
        HarvesterInfo::new("catalogue", "Catalogue harvester")
    }

    async fn gather(&self, _job: &HarvestJob) -> Result<Vec<GatheredObject>, HarvesterError> {
        if self.fail_gather {
            return Err(HarvesterError::Remote("catalogue unreachable".into()));
        }
        Ok(self
            .ids
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(GatheredObject::from)
            .collect())
    }

    async fn fetch(&self, object: &mut HarvestObject) -> Result<FetchOutcome, HarvesterError> {
        if object.id.starts_with("bad-") {
            return Err(HarvesterError::Remote(format!("404 for {}", object.guid)));
        }
        if object.id.starts_with("same-") {
            return Ok(FetchOutcome::Unchanged);
        }
        object.set_extra("content_hash", "abc123");
        Ok(FetchOutcome::Fetched)
    }

    async fn import(&self, object: &mut HarvestObject) -> Result<ImportOutcome, HarvesterError> {
        object.current = true;
        object.package_id = Some(format!("pkg-{}", object.guid));
        Ok(ImportOutcome::Imported)
    }
}

async fn pipeline_with(harvester: CatalogueHarvester) -> (HarvestPipeline, MemoryStore) {
    let store = MemoryStore::new();
    let job = HarvestJob::new("job-1", HarvestSource::new("src-1", "catalogue"));
    store.save_job(&job).await.unwrap();
    for id in ["A", "B", "C"] {
        store
            .save_object(&HarvestObject::new(id, &job, id))
            .await
            .unwrap();
    }

    let registry = HarvesterRegistry::new().with(Arc::new(harvester)).unwrap();
    let pipeline = HarvestPipeline::new(
        ConnectionFactory::new(BrokerConfig::memory()),
        registry,
        Arc::new(store.clone()),
    );
    (pipeline, store)
}

fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_full_harvest_reconciles_and_classifies() {
    let (pipeline, store) =
        pipeline_with(CatalogueHarvester::new(&["B", "C", "D", "same-E", "bad-F"])).await;

    pipeline.trigger("job-1").await.unwrap();
    let (gathered, fetched) = pipeline.run_until_idle().await.unwrap();

    assert_eq!(gathered, 1);
    assert_eq!(fetched, 5);
    assert_eq!(
        store.object_ids_for_job("job-1").await.unwrap(),
        ids(&["B", "C", "D", "same-E", "bad-F"])
    );

    let same = store.get_object("same-E").await.unwrap().unwrap();
    assert_eq!(same.state, ObjectState::Complete);
    assert_eq!(same.report_status, Some(ReportStatus::Unchanged));
    assert!(same.import_started.is_none());

    let bad = store.get_object("bad-F").await.unwrap().unwrap();
    assert_eq!(bad.state, ObjectState::Error);
    assert_eq!(bad.report_status, Some(ReportStatus::Errored));

    let report = JobReport::for_job(&store, "job-1").await.unwrap();
    assert_eq!(report.new, 3);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.errored, 1);
    assert_eq!(report.object_errors, 1);
    assert!(report.is_complete());

    let broker = pipeline.connections().memory_broker();
    assert_eq!(broker.queue_len(GATHER_QUEUE.name), 0);
    assert_eq!(broker.queue_len(FETCH_QUEUE.name), 0);
    assert_eq!(broker.unacked_len(), 0);
}

#[tokio::test]
async fn test_gather_failure_leaves_no_objects() {
    let (pipeline, store) = pipeline_with(CatalogueHarvester::failing()).await;

    pipeline.trigger("job-1").await.unwrap();
    let (gathered, fetched) = pipeline.run_until_idle().await.unwrap();

    assert_eq!((gathered, fetched), (1, 0));
    let job = store.get_job("job-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Aborted);
    assert!(store.object_ids_for_job("job-1").await.unwrap().is_empty());
    assert_eq!(store.gather_errors("job-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_redelivered_gather_matches_single_delivery() {
    let (pipeline, store) = pipeline_with(CatalogueHarvester::new(&["B", "C", "D"])).await;
    store.fail_next_loads(1);

    pipeline.trigger("job-1").await.unwrap();
    let (gathered, fetched) = pipeline.run_until_idle().await.unwrap();

    // First delivery hit the store failure and was requeued.
    assert_eq!(gathered, 2);
    assert_eq!(fetched, 3);
    assert_eq!(store.reset_count(), 1);
    assert_eq!(
        store.object_ids_for_job("job-1").await.unwrap(),
        ids(&["B", "C", "D"])
    );

    // A duplicate gather message converges to the same object set.
    pipeline.trigger("job-1").await.unwrap();
    pipeline.run_until_idle().await.unwrap();
    assert_eq!(
        store.object_ids_for_job("job-1").await.unwrap(),
        ids(&["B", "C", "D"])
    );
    for id in ["B", "C", "D"] {
        let obj = store.get_object(id).await.unwrap().unwrap();
        assert_eq!(obj.report_status, Some(ReportStatus::New));
    }
}

#[tokio::test]
async fn test_message_without_identifier_is_dropped() {
    let (pipeline, store) = pipeline_with(CatalogueHarvester::new(&["A"])).await;
    let broker = pipeline.connections().memory_broker().clone();
    broker.declare(GATHER_QUEUE);
    broker.publish(GATHER_QUEUE.routing_key, br#"{"job": "job-1"}"#.to_vec());
    broker.publish(
        GATHER_QUEUE.routing_key,
        encode_payload(JOB_ID_KEY, "no-such-job").unwrap(),
    );

    let (gathered, fetched) = pipeline.run_until_idle().await.unwrap();

    assert_eq!((gathered, fetched), (2, 0));
    assert_eq!(broker.queue_len(GATHER_QUEUE.name), 0);
    let job = store.get_job("job-1").await.unwrap().unwrap();
    assert!(job.gather_started.is_none());
    assert_eq!(
        store.object_ids_for_job("job-1").await.unwrap(),
        ids(&["A", "B", "C"])
    );
}

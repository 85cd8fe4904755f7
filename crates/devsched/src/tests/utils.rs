use crate::resources::{ContainerInfo, NodeInfo, PodInfo};

#[allow(unused)]
pub fn enable_test_logging() {
    env_logger::builder().is_test(true).init()
}

#[derive(Default)]
pub struct ContBuilder {
    cont: ContainerInfo,
}

impl ContBuilder {
    pub fn request(mut self, key: &str, quantity: i64) -> Self {
        self.cont.requests.insert(key.to_string(), quantity);
        self.cont.dev_requests.insert(key.to_string(), quantity);
        self
    }

    pub fn scorer(mut self, key: &str, selector: i64) -> Self {
        self.cont.scorer.insert(key.to_string(), selector);
        self
    }

    pub fn allocate_from(mut self, req_key: &str, alloc_key: &str) -> Self {
        self.cont
            .allocate_from
            .get_or_insert_with(Default::default)
            .insert(req_key.to_string(), alloc_key.to_string());
        self
    }

    pub fn finish(self) -> ContainerInfo {
        self.cont
    }
}

pub fn cont() -> ContBuilder {
    ContBuilder::default()
}

pub struct PodBuilder {
    pod: PodInfo,
}

impl PodBuilder {
    pub fn running(mut self, name: &str, builder: ContBuilder) -> Self {
        self.pod
            .running_containers
            .insert(name.to_string(), builder.finish());
        self
    }

    pub fn init(mut self, name: &str, builder: ContBuilder) -> Self {
        self.pod
            .init_containers
            .insert(name.to_string(), builder.finish());
        self
    }

    pub fn finish(self) -> PodInfo {
        self.pod
    }
}

pub fn pod(name: &str) -> PodBuilder {
    PodBuilder {
        pod: PodInfo::new(name),
    }
}

pub struct NodeBuilder {
    node: NodeInfo,
}

impl NodeBuilder {
    pub fn alloc(mut self, key: &str, quantity: i64) -> Self {
        self.node.capacity.insert(key.to_string(), quantity);
        self.node.allocatable.insert(key.to_string(), quantity);
        self
    }

    pub fn used(mut self, key: &str, quantity: i64) -> Self {
        self.node.used.insert(key.to_string(), quantity);
        self
    }

    pub fn scorer(mut self, key: &str, selector: i64) -> Self {
        self.node.scorer.insert(key.to_string(), selector);
        self
    }

    pub fn finish(self) -> NodeInfo {
        self.node
    }
}

pub fn node(name: &str) -> NodeBuilder {
    NodeBuilder {
        node: NodeInfo::new(name),
    }
}

//! Fixed manifest skeletons of the host jobs.
//!
//! Skeletons carry no parameters, every runtime value is set on the typed
//! object after deserialization.

pub const ATTACH_JOB: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  labels:
    app: blockscaler
spec:
  backoffLimit: 0
  ttlSecondsAfterFinished: 86400
  template:
    spec:
      restartPolicy: Never
      containers:
      - name: attach
        image: redhat/ubi8-micro@sha256:4f6f8db9a6dc949d9779a57c43954b251957bd4d019a37edbbde8ed5228fe90a
        command:
        - ls
        - /pvc
        volumeMounts:
        - mountPath: /pvc
          name: attach
          readOnly: true
"#;

pub const HOST_JOB: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  labels:
    app: blockscaler
spec:
  backoffLimit: 3
  ttlSecondsAfterFinished: 86400
  template:
    spec:
      hostPID: true
      restartPolicy: Never
      containers:
      - name: host
        image: nixery.dev/shell/gawk/gnugrep/gnused/coreutils-full/cri-tools/docker-client
        securityContext:
          privileged: true
        volumeMounts:
        - mountPath: /run/containerd/containerd.sock
          name: containerd-socket
          readOnly: true
        - mountPath: /var/run/docker.sock
          name: docker-socket
          readOnly: true
        - mountPath: /host
          name: host
      volumes:
      - name: containerd-socket
        hostPath:
          path: /run/containerd/containerd.sock
      - name: docker-socket
        hostPath:
          path: /var/run/docker.sock
      - name: host
        hostPath:
          path: /
"#;
